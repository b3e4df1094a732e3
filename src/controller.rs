//! Top-level wiring of the gateway.
pub mod controller_handler;

pub use controller_handler::Controller;

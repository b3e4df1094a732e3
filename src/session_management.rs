//! Session management core module.
//!
//! One VM session per client connection. The connection feeds JSON call frames to
//! [`serve_connection`], which drives a [`SessionController`] and streams replies back.

/// Request/reply wire types and the per-call reply handle.
pub mod call_context;
pub mod connection;
#[cfg(test)]
pub(crate) mod fakes;
pub mod secret_generator;
/// Session data and lifecycle states.
pub mod session;
pub mod session_controller;

pub use call_context::{CallContext, CallReply, CallRequest, StartError};
pub use connection::serve_connection;
pub use secret_generator::SecretGenerator;
pub use session::{Session, SessionState};
pub use session_controller::{SessionController, SessionServices, SessionSettings};

pub mod configuration;
pub mod container_management;
pub mod controller;
pub mod directory;
pub mod error_handling;
pub mod network;
pub mod session_management;
pub mod tunnel;
pub mod web_interface;

pub use session_management::{SessionState, StartError};

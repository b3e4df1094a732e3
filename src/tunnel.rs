//! Browser access to the emulator display.
//!
//! An [`AccessTunnel`] is a separate worker process (`vmgate tunnel ...`) that accepts
//! WebSocket clients and relays their bytes to the display port of a session. The
//! [`relay`] module is what that worker runs.

pub mod access_tunnel;
pub mod relay;

pub use access_tunnel::{AccessTunnel, Tunnel, TunnelLauncher, WorkerCommand, WorkerLauncher};

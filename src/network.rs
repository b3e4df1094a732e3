//! Host-side networking: port reservation and the monitor control channel.

pub mod control_channel;
pub mod port_allocator;
pub mod types;

pub use control_channel::{ChannelState, ControlChannel, ControlCommand};
pub use port_allocator::PortAllocator;
pub use types::RetryPolicy;

//! Relay coordination
//!
//! Wire protocol and the persistent auto-reconnecting command channel to
//! the central coordinator.

mod client;
mod protocol;

pub use client::{ChannelStatus, CommandChannel, ConnectionState, RelayConfig};
pub use protocol::{
    parse_command, AccountAnnouncement, AccountRecord, Command, Envelope, Outbound, TaskStatus,
};

//! Switchboard Core - Shared types, configuration and identity generation
//!
//! This crate contains the foundational pieces used by the relay.
//! It has no dependencies on networking code.

pub mod config;
pub mod id;

pub use config::{Config, ConfigError, HubConfig, ServerConfig, TransportConfig};
pub use id::{IdError, PeerId};

/// Default listening port
pub const DEFAULT_PORT: u16 = 8080;

/// Default WebSocket endpoint path
pub const DEFAULT_WS_PATH: &str = "/ws";

/// Outbound mailbox capacity per session.
///
/// Kept small so an unresponsive peer is detected after a few dozen
/// undelivered envelopes.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 32;

/// Capacity of the shared hub event queue
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 256;

/// Maximum inbound message size (16 KB, enough for SDP with video)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024;

/// Time allowed to write a single frame to a peer
pub const WRITE_WAIT_SECS: u64 = 10;

/// Time allowed between pongs before a peer is considered gone
pub const PONG_WAIT_SECS: u64 = 60;

/// Ping interval, must be shorter than `PONG_WAIT_SECS`
pub const PING_PERIOD_SECS: u64 = PONG_WAIT_SECS * 9 / 10;

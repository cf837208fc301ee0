//! Switchboard Relay
//!
//! Real-time signaling relay for peer-to-peer negotiation. Peers connect via
//! WebSocket, receive an identity from the relay, learn about each other and
//! exchange opaque offers, answers and candidates until they can talk
//! directly.
//!
//! # Protocol
//!
//! 1. Peer connects to `/ws` and receives `welcome{id, peerIds}`
//! 2. Every other peer receives `user-joined` with the new identity
//! 3. Directed envelopes (`targetId` set) are forwarded to that peer only,
//!    with `senderId` set by the relay
//! 4. An unknown target is answered with an `error` envelope
//! 5. When a peer disconnects or stops draining its mailbox, the others
//!    receive `user-left`

pub mod envelope;
pub mod error;
pub mod hub;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod transport;

pub use envelope::{Envelope, Kind, Welcome};
pub use error::{DeliveryError, HubError, RelayError};
pub use hub::{Hub, HubEvent, HubHandle, HubStats};
pub use registry::Registry;
pub use router::Route;
pub use server::RelayServer;
pub use session::{mailbox, MailboxReceiver, MailboxSender, Session, SessionState};

pub use switchboard_core::{Config, PeerId};

//! Routing decisions
//!
//! Given the registry, a sender and an inbound envelope, decide where the
//! envelope goes. Nothing here touches a mailbox; the hub executes the
//! returned route.

use switchboard_core::PeerId;

use crate::envelope::{Envelope, Kind};
use crate::registry::Registry;

/// Where an inbound envelope should go
#[derive(Clone, Debug, PartialEq)]
pub enum Route {
    /// Deliver to exactly one session
    Direct { target: PeerId, envelope: Envelope },

    /// The target is not registered; `reply` goes back to the sender only
    TargetNotFound { target: PeerId, reply: Envelope },

    /// No target. Peer-originated broadcast is accepted but not relayed.
    Undirected { kind: Kind },
}

/// Decide the route of an envelope sent by `sender`.
///
/// The sender identity on the envelope is replaced with `sender`; whatever
/// the peer put there is discarded.
pub fn route(registry: &Registry, sender: &PeerId, mut envelope: Envelope) -> Route {
    envelope.sender_id = Some(sender.clone());

    let Some(target) = envelope.target().cloned() else {
        return Route::Undirected {
            kind: envelope.kind,
        };
    };

    if registry.contains(&target) {
        Route::Direct { target, envelope }
    } else {
        Route::TargetNotFound {
            reply: Envelope::target_not_found(&target),
            target,
        }
    }
}

/// Recipients of a notice about `subject`: every active session but the subject
pub fn broadcast_targets(registry: &Registry, subject: &PeerId) -> Vec<PeerId> {
    registry.peer_ids_except(subject)
}

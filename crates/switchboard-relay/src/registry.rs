//! Session registry
//!
//! The authoritative identity -> session map. It is owned by the hub task and
//! never shared, so it carries no locks. Only active sessions are stored:
//! removal and closing happen together in `deregister`.

use std::collections::HashMap;

use tracing::{debug, warn};

use switchboard_core::{IdError, PeerId};

use crate::envelope::Envelope;
use crate::error::DeliveryError;
use crate::session::{MailboxSender, Session, SessionState};

/// Attempts at drawing a fresh identity before giving up
const MAX_ID_DRAWS: usize = 8;

/// Identity -> session map
#[derive(Debug, Default)]
pub struct Registry {
    sessions: HashMap<PeerId, Session>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new active session and return its identity.
    ///
    /// Identities are re-drawn if one collides with a registered session.
    pub fn register(&mut self, mailbox: MailboxSender) -> Result<PeerId, IdError> {
        let mut id = PeerId::generate()?;
        let mut draws = 1;
        while self.sessions.contains_key(&id) && draws < MAX_ID_DRAWS {
            warn!("Identity collision on {}, drawing again", id);
            id = PeerId::generate()?;
            draws += 1;
        }
        if self.sessions.contains_key(&id) {
            // Eight collisions in a 128-bit space means the RNG is broken.
            return Err(IdError::Exhausted);
        }

        self.sessions
            .insert(id.clone(), Session::new(id.clone(), mailbox));
        debug!("Registered session {} ({} active)", id, self.sessions.len());
        Ok(id)
    }

    /// Remove a session and close its mailbox.
    ///
    /// Idempotent: returns whether a removal actually happened.
    pub fn deregister(&mut self, id: &PeerId, reason: &str) -> bool {
        let Some(mut session) = self.sessions.remove(id) else {
            debug!("Session {} already gone ({})", id, reason);
            return false;
        };

        let closed = session.close();
        debug!(
            "Deregistered session {} after {:?} ({}), {} active",
            id,
            session.connected_for(),
            reason,
            self.sessions.len()
        );
        closed
    }

    /// Non-blocking delivery to one session
    pub fn try_deliver(&self, id: &PeerId, envelope: Envelope) -> Result<(), DeliveryError> {
        match self.sessions.get(id) {
            Some(session) => session.try_deliver(envelope),
            None => Err(DeliveryError::NotFound(id.clone())),
        }
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Lifecycle state of a registered session (always `Active`)
    pub fn state_of(&self, id: &PeerId) -> Option<SessionState> {
        self.sessions.get(id).map(Session::state)
    }

    /// Identities of every active session except `exclude`
    pub fn peer_ids_except(&self, exclude: &PeerId) -> Vec<PeerId> {
        self.sessions
            .keys()
            .filter(|id| *id != exclude)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{mailbox, MailboxReceiver};

    fn register(registry: &mut Registry, capacity: usize) -> (PeerId, MailboxReceiver) {
        let (tx, rx) = mailbox(capacity);
        (registry.register(tx).unwrap(), rx)
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = Registry::new();
        assert!(registry.is_empty());

        let (a, _rx_a) = register(&mut registry, 4);
        let (b, _rx_b) = register(&mut registry, 4);

        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.state_of(&a), Some(SessionState::Active));
        assert_eq!(registry.peer_ids_except(&a), vec![b.clone()]);
    }

    #[test]
    fn test_deregister_is_idempotent() {
        let mut registry = Registry::new();
        let (a, mut rx) = register(&mut registry, 4);

        assert!(registry.deregister(&a, "test"));
        assert!(!registry.contains(&a));
        assert_eq!(registry.state_of(&a), None);
        assert!(rx.try_recv().is_err());

        assert!(!registry.deregister(&a, "test again"));
        assert!(!registry.deregister(&PeerId::from("never-registered"), "test"));
    }

    #[test]
    fn test_deregister_keeps_pending_envelope() {
        let mut registry = Registry::new();
        let (a, mut rx) = register(&mut registry, 4);
        registry.try_deliver(&a, Envelope::error("queued")).unwrap();

        registry.deregister(&a, "test");

        assert_eq!(rx.try_recv().unwrap().payload, "queued");
        assert!(matches!(
            rx.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_try_deliver_unknown() {
        let registry = Registry::new();
        let ghost = PeerId::from("ghost");
        assert_eq!(
            registry.try_deliver(&ghost, Envelope::error("x")),
            Err(DeliveryError::NotFound(ghost))
        );
    }

    #[test]
    fn test_try_deliver_full() {
        let mut registry = Registry::new();
        let (a, _rx) = register(&mut registry, 1);

        registry.try_deliver(&a, Envelope::error("1")).unwrap();
        assert_eq!(
            registry.try_deliver(&a, Envelope::error("2")),
            Err(DeliveryError::MailboxFull(a.clone()))
        );
        // A failed delivery alone does not remove the session.
        assert!(registry.contains(&a));
    }
}

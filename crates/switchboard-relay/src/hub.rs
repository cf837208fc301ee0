//! Hub: the single control authority
//!
//! The hub owns the [`Registry`] and is the only code that mutates it.
//! Connections talk to it exclusively through one shared event queue:
//!
//! ```text
//! Connection tasks                      Hub task
//! ────────────────                      ────────
//!   Join { mailbox, reply } ─────┐
//!   Inbound { from, envelope } ──┼──► mpsc (bounded) ──► handle_event()
//!   Leave { id } ────────────────┘                           │
//!                                                            │ try_send
//!   writer ◄──────────── per-session mailbox ◄───────────────┘
//! ```
//!
//! Events are processed one at a time in arrival order, which is the only
//! ordering guarantee the relay makes. Handling an event never awaits: every
//! mailbox push is non-blocking, and a push that fails marks the recipient as
//! unresponsive and removes it. Nothing is retried.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use switchboard_core::{HubConfig, PeerId};

use crate::envelope::Envelope;
use crate::error::HubError;
use crate::registry::Registry;
use crate::router::{self, Route};
use crate::session::MailboxSender;

/// Events consumed by the hub
#[derive(Debug)]
pub enum HubEvent {
    /// A new connection wants a session; the assigned identity is replied
    Join {
        mailbox: MailboxSender,
        reply: oneshot::Sender<PeerId>,
    },

    /// A connection ended, for whatever reason
    Leave { id: PeerId },

    /// An envelope read from the connection of `from`
    Inbound { from: PeerId, envelope: Envelope },

    /// Snapshot of the hub counters
    Stats { reply: oneshot::Sender<HubStats> },
}

/// Hub counters, served on `/stats`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStats {
    pub active_sessions: usize,
    pub joins_total: u64,
    pub leaves_total: u64,
    pub evictions_total: u64,
    pub forwarded_total: u64,
    pub not_found_total: u64,
    pub dropped_total: u64,
}

/// Cloneable sending side of the hub's event queue
#[derive(Clone, Debug)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    /// Request a session for a new connection.
    ///
    /// The hub takes ownership of the mailbox sender; the caller keeps the
    /// receiver and drains it to the wire.
    pub async fn join(&self, mailbox: MailboxSender) -> Result<PeerId, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubEvent::Join { mailbox, reply }).await?;
        rx.await.map_err(|_| HubError::Rejected)
    }

    /// Report that the connection of `id` ended
    pub async fn leave(&self, id: PeerId) -> Result<(), HubError> {
        self.send(HubEvent::Leave { id }).await
    }

    /// Hand an inbound envelope from `from` to the hub
    pub async fn forward(&self, from: PeerId, envelope: Envelope) -> Result<(), HubError> {
        self.send(HubEvent::Inbound { from, envelope }).await
    }

    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubEvent::Stats { reply }).await?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    async fn send(&self, event: HubEvent) -> Result<(), HubError> {
        self.events.send(event).await.map_err(|_| HubError::Stopped)
    }
}

/// The event loop and its state
pub struct Hub {
    registry: Registry,
    events: mpsc::Receiver<HubEvent>,
    stats: HubStats,
}

impl Hub {
    /// Create a hub and the handle connections use to reach it
    pub fn new(config: &HubConfig) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(config.event_queue_capacity.max(1));
        let hub = Self {
            registry: Registry::new(),
            events: rx,
            stats: HubStats::default(),
        };
        (hub, HubHandle { events: tx })
    }

    /// Create a hub and run it on its own task
    pub fn spawn(config: &HubConfig) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(config);
        (handle, tokio::spawn(hub.run()))
    }

    /// Process events until every handle has been dropped
    pub async fn run(mut self) {
        info!("Hub started");
        while let Some(event) = self.events.recv().await {
            self.handle_event(event);
        }
        info!(
            "Hub stopped, closing {} remaining sessions",
            self.registry.len()
        );
    }

    /// Process exactly one event
    pub fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Join { mailbox, reply } => self.on_join(mailbox, reply),
            HubEvent::Leave { id } => {
                if self.remove(&id, "connection closed") {
                    self.stats.leaves_total += 1;
                }
            }
            HubEvent::Inbound { from, envelope } => self.on_inbound(from, envelope),
            HubEvent::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            active_sessions: self.registry.len(),
            ..self.stats.clone()
        }
    }

    fn on_join(&mut self, mailbox: MailboxSender, reply: oneshot::Sender<PeerId>) {
        let id = match self.registry.register(mailbox) {
            Ok(id) => id,
            Err(e) => {
                // Dropping `reply` tells the connection it was rejected.
                error!("Failed to register session: {}", e);
                return;
            }
        };
        self.stats.joins_total += 1;

        if reply.send(id.clone()).is_err() {
            debug!("Connection for {} went away before its identity arrived", id);
        }

        let peers = self.registry.peer_ids_except(&id);
        info!("Session {} joined ({} other peers)", id, peers.len());

        if let Err(e) = self.registry.try_deliver(&id, Envelope::welcome(&id, peers)) {
            warn!("Welcome undeliverable, dropping new session: {}", e);
            if self.remove(&id, "welcome undeliverable") {
                self.stats.evictions_total += 1;
            }
            return;
        }

        let failed = self.broadcast(&Envelope::user_joined(&id), &id);
        self.evict_all(failed, "unresponsive during user-joined");
    }

    fn on_inbound(&mut self, from: PeerId, envelope: Envelope) {
        if !self.registry.contains(&from) {
            debug!(
                "Dropping {} from {}: sender no longer active",
                envelope.kind, from
            );
            self.stats.dropped_total += 1;
            return;
        }

        let mut failed = Vec::new();
        match router::route(&self.registry, &from, envelope) {
            Route::Direct { target, envelope } => {
                let kind = envelope.kind.clone();
                match self.registry.try_deliver(&target, envelope) {
                    Ok(()) => {
                        self.stats.forwarded_total += 1;
                        debug!("Forwarded {} from {} to {}", kind, from, target);
                    }
                    Err(e) => {
                        warn!("Forwarding {} from {} failed: {}", kind, from, e);
                        failed.push(target);
                    }
                }
            }
            Route::TargetNotFound { target, reply } => {
                self.stats.not_found_total += 1;
                debug!("Target {} of message from {} not found", target, from);
                if let Err(e) = self.registry.try_deliver(&from, reply) {
                    warn!("Could not report unknown target to {}: {}", from, e);
                    failed.push(from);
                }
            }
            Route::Undirected { kind } => {
                // Peer-originated broadcast is not relayed.
                self.stats.dropped_total += 1;
                debug!("Ignoring undirected {} from {}", kind, from);
            }
        }

        self.evict_all(failed, "unresponsive recipient");
    }

    /// Push `envelope` to every active session except `subject`.
    ///
    /// Returns the recipients whose mailbox rejected it.
    fn broadcast(&self, envelope: &Envelope, subject: &PeerId) -> Vec<PeerId> {
        router::broadcast_targets(&self.registry, subject)
            .into_iter()
            .filter(|id| match self.registry.try_deliver(id, envelope.clone()) {
                Ok(()) => false,
                Err(e) => {
                    debug!("Broadcast of {} failed: {}", envelope.kind, e);
                    true
                }
            })
            .collect()
    }

    fn evict_all(&mut self, ids: Vec<PeerId>, reason: &str) {
        for id in ids {
            if self.remove(&id, reason) {
                self.stats.evictions_total += 1;
            }
        }
    }

    /// Leave procedure: deregister and, if something was removed, tell the
    /// remaining sessions. Failures during the notice are not acted on here;
    /// they surface on the next delivery to that session.
    fn remove(&mut self, id: &PeerId, reason: &str) -> bool {
        if !self.registry.deregister(id, reason) {
            return false;
        }
        info!(
            "Session {} left ({}), {} remaining",
            id,
            reason,
            self.registry.len()
        );

        let failed = self.broadcast(&Envelope::user_left(id), id);
        if !failed.is_empty() {
            debug!(
                "{} sessions did not accept the user-left notice for {}",
                failed.len(),
                id
            );
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Kind;
    use crate::session::{mailbox, MailboxReceiver};
    use serde_json::json;

    fn config(mailbox_capacity: usize) -> HubConfig {
        HubConfig {
            mailbox_capacity,
            ..HubConfig::default()
        }
    }

    fn join(hub: &mut Hub, capacity: usize) -> (PeerId, MailboxReceiver) {
        let (tx, rx) = mailbox(capacity);
        let (reply, mut reply_rx) = oneshot::channel();
        hub.handle_event(HubEvent::Join { mailbox: tx, reply });
        (reply_rx.try_recv().unwrap(), rx)
    }

    fn drain(rx: &mut MailboxReceiver) -> Vec<Envelope> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn test_join_replies_identity_and_welcome() {
        let (mut hub, _handle) = Hub::new(&config(8));
        let (a, mut rx_a) = join(&mut hub, 8);

        let got = drain(&mut rx_a);
        assert_eq!(got.len(), 1);
        let welcome = got[0].welcome_payload().unwrap();
        assert_eq!(welcome.id, a);
        assert!(welcome.peer_ids.is_empty());
        assert_eq!(hub.stats().active_sessions, 1);
    }

    #[test]
    fn test_welcome_failure_runs_leave_procedure() {
        let (mut hub, _handle) = Hub::new(&config(8));
        let (a, mut rx_a) = join(&mut hub, 8);
        drain(&mut rx_a);

        // Reader side already gone: the welcome cannot be delivered.
        let (tx, rx) = mailbox(8);
        drop(rx);
        let (reply, mut reply_rx) = oneshot::channel();
        hub.handle_event(HubEvent::Join { mailbox: tx, reply });
        let ghost = reply_rx.try_recv().unwrap();

        assert_eq!(hub.registry().len(), 1);
        assert!(hub.registry().contains(&a));
        assert!(!hub.registry().contains(&ghost));

        // No join notice, one leave notice.
        let got = drain(&mut rx_a);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].kind, Kind::UserLeft);
        assert_eq!(got[0].sender_id.as_ref(), Some(&ghost));
        assert_eq!(got[0].payload, json!(ghost.as_str()));
        assert_eq!(hub.stats().evictions_total, 1);
    }

    #[test]
    fn test_stale_sender_dropped() {
        let (mut hub, _handle) = Hub::new(&config(8));
        let (a, mut rx_a) = join(&mut hub, 8);
        drain(&mut rx_a);

        hub.handle_event(HubEvent::Inbound {
            from: PeerId::from("ghost"),
            envelope: Envelope::new("offer", json!(1)).to(a.clone()),
        });

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(hub.stats().dropped_total, 1);
    }

    #[test]
    fn test_undirected_peer_message_is_noop() {
        let (mut hub, _handle) = Hub::new(&config(8));
        let (a, mut rx_a) = join(&mut hub, 8);
        let (_b, mut rx_b) = join(&mut hub, 8);
        drain(&mut rx_a);
        drain(&mut rx_b);

        hub.handle_event(HubEvent::Inbound {
            from: a,
            envelope: Envelope::new("chat", json!("hi")),
        });

        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(hub.registry().len(), 2);
    }

    #[test]
    fn test_stats_event_replies() {
        let (mut hub, _handle) = Hub::new(&config(8));
        let (_a, _rx_a) = join(&mut hub, 8);

        let (reply, mut rx) = oneshot::channel();
        hub.handle_event(HubEvent::Stats { reply });
        let stats = rx.try_recv().unwrap();
        assert_eq!(stats.active_sessions, 1);
        assert_eq!(stats.joins_total, 1);
    }

    #[test]
    fn test_leave_notifies_once() {
        let (mut hub, _handle) = Hub::new(&config(8));
        let (a, _rx_a) = join(&mut hub, 8);
        let (_b, mut rx_b) = join(&mut hub, 8);
        drain(&mut rx_b);

        hub.handle_event(HubEvent::Leave { id: a.clone() });
        hub.handle_event(HubEvent::Leave { id: a.clone() });

        let got = drain(&mut rx_b);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].kind, Kind::UserLeft);
        assert_eq!(hub.stats().leaves_total, 1);
    }

    #[tokio::test]
    async fn test_spawned_hub_via_handle() {
        let (handle, task) = Hub::spawn(&config(8));

        let (tx, mut rx) = mailbox(8);
        let id = handle.join(tx).await.unwrap();
        let welcome = rx.recv().await.unwrap();
        assert_eq!(welcome.welcome_payload().unwrap().id, id);

        handle.leave(id).await.unwrap();
        // Mailbox is closed once the leave is processed.
        assert!(rx.recv().await.is_none());

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.active_sessions, 0);
        assert_eq!(stats.leaves_total, 1);

        drop(handle);
        task.await.unwrap();
    }
}

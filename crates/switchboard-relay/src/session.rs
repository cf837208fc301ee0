//! Sessions and their outbound mailboxes
//!
//! A session is the hub-side handle for one connected peer. Its mailbox is a
//! bounded tokio channel: the hub pushes with `try_send` and never waits, the
//! connection writer pops in order. Closing the mailbox means dropping the
//! hub's sender, which the writer observes as end-of-stream once the
//! envelopes already queued have been flushed.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use switchboard_core::PeerId;

use crate::envelope::Envelope;
use crate::error::DeliveryError;

/// Producer side of a mailbox, handed to the hub on join
pub type MailboxSender = mpsc::Sender<Envelope>;

/// Consumer side of a mailbox, kept by the connection writer
pub type MailboxReceiver = mpsc::Receiver<Envelope>;

/// Create a mailbox with the given capacity.
///
/// A capacity of zero is bumped to one; tokio channels cannot be unbuffered.
pub fn mailbox(capacity: usize) -> (MailboxSender, MailboxReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Lifecycle of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Closing,
    Closed,
}

/// Hub-side handle for one connected peer
#[derive(Debug)]
pub struct Session {
    id: PeerId,
    mailbox: Option<MailboxSender>,
    state: SessionState,
    joined_at: Instant,
}

impl Session {
    pub fn new(id: PeerId, mailbox: MailboxSender) -> Self {
        Self {
            id,
            mailbox: Some(mailbox),
            state: SessionState::Active,
            joined_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connected_for(&self) -> Duration {
        self.joined_at.elapsed()
    }

    /// Non-blocking enqueue
    pub fn try_deliver(&self, envelope: Envelope) -> Result<(), DeliveryError> {
        let mailbox = match (&self.mailbox, self.state) {
            (Some(mailbox), SessionState::Active) => mailbox,
            _ => return Err(DeliveryError::MailboxClosed(self.id.clone())),
        };

        mailbox.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::MailboxFull(self.id.clone()),
            TrySendError::Closed(_) => DeliveryError::MailboxClosed(self.id.clone()),
        })
    }

    /// Move `Active -> Closing -> Closed`, dropping the mailbox sender.
    ///
    /// Returns false if the session was not active; the mailbox is then
    /// left untouched, so it is closed at most once.
    pub fn close(&mut self) -> bool {
        if self.state != SessionState::Active {
            return false;
        }
        self.state = SessionState::Closing;
        self.mailbox = None;
        self.state = SessionState::Closed;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Kind;

    fn make_session(capacity: usize) -> (Session, MailboxReceiver) {
        let (tx, rx) = mailbox(capacity);
        (Session::new(PeerId::from("a"), tx), rx)
    }

    #[test]
    fn test_new_session_is_active() {
        let (session, _rx) = make_session(4);
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.id().as_str(), "a");
    }

    #[test]
    fn test_deliver_preserves_order() {
        let (session, mut rx) = make_session(4);
        for i in 0..3 {
            session
                .try_deliver(Envelope::new("offer", serde_json::json!(i)))
                .unwrap();
        }

        for i in 0..3 {
            assert_eq!(rx.try_recv().unwrap().payload, serde_json::json!(i));
        }
    }

    #[test]
    fn test_full_mailbox_rejects_without_blocking() {
        let (session, _rx) = make_session(2);
        session.try_deliver(Envelope::error("1")).unwrap();
        session.try_deliver(Envelope::error("2")).unwrap();

        let err = session.try_deliver(Envelope::error("3")).unwrap_err();
        assert_eq!(err, DeliveryError::MailboxFull(PeerId::from("a")));
        assert!(err.is_unresponsive());
    }

    #[test]
    fn test_dropped_reader_is_closed() {
        let (session, rx) = make_session(2);
        drop(rx);

        let err = session.try_deliver(Envelope::error("x")).unwrap_err();
        assert!(matches!(err, DeliveryError::MailboxClosed(_)));
    }

    #[test]
    fn test_close_once_keeps_pending_envelopes() {
        let (mut session, mut rx) = make_session(4);
        session.try_deliver(Envelope::error("pending")).unwrap();

        assert!(session.close());
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.close());

        // Queued envelope survives the close, then the stream ends.
        assert_eq!(rx.try_recv().unwrap().kind, Kind::Error);
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_closed_session_rejects_delivery() {
        let (mut session, _rx) = make_session(4);
        session.close();
        assert!(matches!(
            session.try_deliver(Envelope::error("late")),
            Err(DeliveryError::MailboxClosed(_))
        ));
    }
}

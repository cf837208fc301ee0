//! Error types for the relay

use thiserror::Error;

use switchboard_core::PeerId;

/// Why an envelope could not be placed in a mailbox
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("session {0} not found")]
    NotFound(PeerId),

    #[error("mailbox of session {0} is full")]
    MailboxFull(PeerId),

    #[error("mailbox of session {0} is closed")]
    MailboxClosed(PeerId),
}

impl DeliveryError {
    /// The recipient exists but cannot keep up (or its reader is gone)
    pub fn is_unresponsive(&self) -> bool {
        matches!(
            self,
            DeliveryError::MailboxFull(_) | DeliveryError::MailboxClosed(_)
        )
    }
}

/// Errors returned by `HubHandle`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("hub is not running")]
    Stopped,

    #[error("hub refused the session")]
    Rejected,
}

/// Errors from the listener and connection handling
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Hub(#[from] HubError),

    #[error("write timed out")]
    WriteTimeout,

    #[error("malformed HTTP request")]
    BadRequest,
}

//! Signaling envelopes
//!
//! The unit of exchange between peers and the relay. On the wire an envelope
//! is a JSON object:
//!
//! ```json
//! { "type": "offer", "senderId": "…", "targetId": "…", "payload": … }
//! ```
//!
//! `payload` is opaque: the relay forwards it without looking inside.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use switchboard_core::PeerId;

/// Envelope kind (`type` on the wire)
///
/// The set is open-ended: unknown kinds are preserved verbatim in `Other`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Kind {
    /// Sent once to a newly joined session
    Welcome,
    /// Another peer joined
    UserJoined,
    /// Another peer left
    UserLeft,
    /// Error reported to the session that caused it
    Error,
    Offer,
    Answer,
    Candidate,
    /// Any kind the relay does not interpret
    Other(String),
}

impl Kind {
    pub fn as_str(&self) -> &str {
        match self {
            Kind::Welcome => "welcome",
            Kind::UserJoined => "user-joined",
            Kind::UserLeft => "user-left",
            Kind::Error => "error",
            Kind::Offer => "offer",
            Kind::Answer => "answer",
            Kind::Candidate => "candidate",
            Kind::Other(s) => s,
        }
    }

    /// Kinds synthesized by the relay itself
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Kind::Welcome | Kind::UserJoined | Kind::UserLeft | Kind::Error
        )
    }
}

impl From<String> for Kind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "welcome" => Kind::Welcome,
            "user-joined" => Kind::UserJoined,
            "user-left" => Kind::UserLeft,
            "error" => Kind::Error,
            "offer" => Kind::Offer,
            "answer" => Kind::Answer,
            "candidate" => Kind::Candidate,
            _ => Kind::Other(s),
        }
    }
}

impl From<&str> for Kind {
    fn from(s: &str) -> Self {
        Kind::from(s.to_owned())
    }
}

impl From<Kind> for String {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Other(s) => s,
            other => other.as_str().to_owned(),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signaling envelope
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: Kind,

    /// True sender; overwritten by the hub on every inbound envelope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<PeerId>,

    /// Recipient of a directed message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<PeerId>,

    /// Opaque payload
    #[serde(default)]
    pub payload: Value,
}

/// Payload of a `welcome` envelope
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    /// Identity assigned to the receiving session
    pub id: PeerId,
    /// Sessions that were already active
    pub peer_ids: Vec<PeerId>,
}

impl Envelope {
    pub fn new(kind: impl Into<Kind>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            sender_id: None,
            target_id: None,
            payload,
        }
    }

    /// Builder-style target
    pub fn to(mut self, target: impl Into<PeerId>) -> Self {
        self.target_id = Some(target.into());
        self
    }

    pub fn welcome(id: &PeerId, peer_ids: Vec<PeerId>) -> Self {
        Self::new(Kind::Welcome, json!({ "id": id, "peerIds": peer_ids }))
    }

    pub fn user_joined(id: &PeerId) -> Self {
        Self {
            sender_id: Some(id.clone()),
            ..Self::new(Kind::UserJoined, Value::String(id.to_string()))
        }
    }

    pub fn user_left(id: &PeerId) -> Self {
        Self {
            sender_id: Some(id.clone()),
            ..Self::new(Kind::UserLeft, Value::String(id.to_string()))
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Kind::Error, Value::String(message.into()))
    }

    pub fn target_not_found(target: &PeerId) -> Self {
        Self::error(format!("Target user {} not found", target))
    }

    /// Target of a directed message; an empty target counts as none
    pub fn target(&self) -> Option<&PeerId> {
        self.target_id.as_ref().filter(|t| !t.is_empty())
    }

    /// Decode the payload of a `welcome` envelope
    pub fn welcome_payload(&self) -> Option<Welcome> {
        if self.kind != Kind::Welcome {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

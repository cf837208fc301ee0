//! Session identities
//!
//! Identities are always assigned by the relay, never taken from a peer.
//! They are drawn from a 128-bit random space and rendered as lowercase hex.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of random bytes in a generated identity
pub const PEER_ID_BYTES: usize = 16;

/// Opaque identity of a connected peer
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

/// Identity generation errors
#[derive(Error, Debug)]
pub enum IdError {
    #[error("system entropy source unavailable: {0}")]
    Rng(#[from] getrandom::Error),

    #[error("could not draw an unused identity")]
    Exhausted,
}

impl PeerId {
    /// Draw a fresh random identity
    pub fn generate() -> Result<Self, IdError> {
        let mut bytes = [0u8; PEER_ID_BYTES];
        getrandom::getrandom(&mut bytes)?;
        Ok(Self(hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PeerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

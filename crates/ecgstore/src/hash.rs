//! ContentHash: a BLAKE3 hash truncated to 128 bits (32 hex chars).
//!
//! Artifacts are addressed by their content. Two flushes that render the
//! exact same bytes share one object on disk.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashError {
    #[error("invalid hash length: expected 32 hex chars, got {0}")]
    InvalidLength(usize),

    #[error("invalid hex character in hash")]
    InvalidHex,
}

impl ContentHash {
    pub fn from_data(data: &[u8]) -> Self {
        let digest = blake3::hash(data);
        Self(hex::encode(&digest.as_bytes()[..16]))
    }

    /// First two characters, used for directory sharding.
    pub fn prefix(&self) -> &str {
        &self.0[0..2]
    }

    /// Everything after the prefix, used as the file name.
    pub fn remainder(&self) -> &str {
        &self.0[2..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 {
            return Err(HashError::InvalidLength(s.len()));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex);
        }
        Ok(Self(s.to_ascii_lowercase()))
    }
}

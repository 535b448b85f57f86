//! SessionKey: the caller-supplied identifier scoping one capture.
//!
//! Keys are used verbatim as file names by the record store, so the
//! alphabet is restricted to `[A-Za-z0-9._-]` with no leading dot.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const MAX_KEY_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionKey(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("session key is empty")]
    Empty,

    #[error("session key is {0} chars, limit is {MAX_KEY_LEN}")]
    TooLong(usize),

    #[error("session key {0:?} must not start with '.'")]
    LeadingDot(String),

    #[error("session key {0:?} contains characters outside [A-Za-z0-9._-]")]
    InvalidChar(String),
}

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Result<Self, KeyError> {
        let key = key.into();
        if key.is_empty() {
            return Err(KeyError::Empty);
        }
        if key.len() > MAX_KEY_LEN {
            return Err(KeyError::TooLong(key.len()));
        }
        if key.starts_with('.') {
            return Err(KeyError::LeadingDot(key));
        }
        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(KeyError::InvalidChar(key));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SessionKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SessionKey> for String {
    fn from(key: SessionKey) -> Self {
        key.0
    }
}

impl AsRef<str> for SessionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Diagnostic ids are integers; every integer renders to a valid key.
macro_rules! key_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for SessionKey {
                fn from(id: $t) -> Self {
                    Self(id.to_string())
                }
            }
        )*
    };
}

key_from_int!(u16, u32, u64, usize, i32, i64);

//! Durable store for ecggarden.
//!
//! Holds one [`SessionRecord`] per session key plus every artifact a
//! capture session flushed, content-addressed by BLAKE3.
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use ecgstore::{RecordStore, SessionStatus};
//!
//! let store = RecordStore::at_path("/var/lib/ecggarden").unwrap();
//! store.init_session("42", Utc::now()).unwrap();
//! store.update_status("42", SessionStatus::Stopped, None, Utc::now()).unwrap();
//! ```

pub mod hash;
pub mod record;
pub mod store;

pub use hash::{ContentHash, HashError};
pub use record::{ArtifactRecord, ObjectMetadata, SessionRecord, SessionStatus, StoredArtifact};
pub use store::RecordStore;

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid session key {0:?}")]
    InvalidSession(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("corrupt record at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StorageError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Session keys double as file names; keep them to a safe alphabet.
pub fn validate_session(session: &str) -> Result<(), StorageError> {
    let valid = !session.is_empty()
        && session.len() <= 128
        && !session.starts_with('.')
        && session
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidSession(session.to_string()))
    }
}

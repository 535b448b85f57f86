//! Durable projections of session lifecycle and saved artifacts.

use crate::hash::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status column of a session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Stopped,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row per session key. Rewritten in place on every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub total_images: u64,
}

impl SessionRecord {
    pub fn running(session: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session: session.into(),
            status: SessionStatus::Running,
            started_at: now,
            stopped_at: None,
            last_error: None,
            total_images: 0,
        }
    }
}

/// Index entry written once per saved artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: ContentHash,
    pub session: String,
    pub created_at: DateTime<Utc>,
    /// Capture window the artifact covers.
    pub capture_duration_ms: u64,
    pub mime_type: String,
    pub size_bytes: u64,
}

/// Sidecar metadata stored next to each object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub mime_type: String,
    pub size: u64,
}

/// Artifact bytes plus what is known about them.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub id: ContentHash,
    pub mime_type: String,
    pub data: Vec<u8>,
}

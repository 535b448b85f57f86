//! Error taxonomy.
//!
//! `AcquireError` is fatal to a worker. `ReadError`, `RenderError` and
//! `StoreError` are logged and skipped inside the capture loop.
//! `SupervisorError` is what callers of the control surface see.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::key::SessionKey;

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("failed to open sampler device {device}: {source}")]
    Device {
        device: PathBuf,
        source: std::io::Error,
    },

    #[error("sampler unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("sampler is not open")]
    NotOpen,

    #[error("I/O error reading sample: {0}")]
    Io(#[from] std::io::Error),

    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("cannot render an empty window")]
    EmptyWindow,

    #[error("WAV encoding failed: {0}")]
    Wav(#[from] hound::Error),

    #[error("render failed: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Storage(#[from] ecgstore::StorageError),

    #[error("store task failed: {0}")]
    Task(String),

    #[error("store rejected write: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("session {0} is already running")]
    AlreadyRunning(SessionKey),

    #[error("session {0} not found")]
    NotFound(SessionKey),

    #[error("failed to launch session {key}: {reason}")]
    LaunchFailed { key: SessionKey, reason: String },

    #[error("session {key} did not confirm exit {waited:?} after kill")]
    StopFailed { key: SessionKey, waited: Duration },
}

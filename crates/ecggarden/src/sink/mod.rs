//! Where session bookkeeping and artifacts end up.
//!
//! The capture loop treats every call as fire-and-forget: failures are
//! logged and never retried by the caller.

mod file;
mod memory;

pub use ecgstore::SessionStatus;
pub use file::FileSink;
pub use memory::{MemorySink, SinkCall};

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::key::SessionKey;
use crate::render::Artifact;

#[async_trait]
pub trait Sink: Send + Sync {
    /// Create the session record, or reset an existing one to running.
    async fn init_session(&self, key: &SessionKey) -> Result<(), StoreError>;

    /// Persist one flushed window covering `duration` of capture.
    async fn save_artifact(
        &self,
        key: &SessionKey,
        artifact: &Artifact,
        duration: Duration,
    ) -> Result<(), StoreError>;

    async fn update_status(
        &self,
        key: &SessionKey,
        status: SessionStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn update_count(&self, key: &SessionKey, count: u64) -> Result<(), StoreError>;

    /// Terminal write: stopped, stamped, with the final artifact count.
    async fn finalize_session(&self, key: &SessionKey, final_count: u64)
        -> Result<(), StoreError>;
}

//! Sink backed by the on-disk record store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ecgstore::{RecordStore, StorageError};

use super::{SessionStatus, Sink};
use crate::error::StoreError;
use crate::key::SessionKey;
use crate::render::Artifact;

/// Every call runs one store operation on the blocking pool. The store
/// opens and closes its own files per call; nothing is held between calls.
#[derive(Debug, Clone)]
pub struct FileSink {
    store: RecordStore,
}

impl FileSink {
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&RecordStore) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn init_session(&self, key: &SessionKey) -> Result<(), StoreError> {
        let key = key.to_string();
        self.run(move |store| store.init_session(&key, Utc::now()))
            .await
            .map(|_| ())
    }

    async fn save_artifact(
        &self,
        key: &SessionKey,
        artifact: &Artifact,
        duration: Duration,
    ) -> Result<(), StoreError> {
        let key = key.to_string();
        let bytes = artifact.bytes.clone();
        let mime_type = artifact.mime_type;
        let created_at = artifact.created_at;

        let record = self
            .run(move |store| store.save_artifact(&key, &bytes, mime_type, duration, created_at))
            .await?;

        tracing::debug!(
            session.key = %record.session,
            artifact.id = %record.id,
            artifact.size = record.size_bytes,
            "Artifact stored"
        );
        Ok(())
    }

    async fn update_status(
        &self,
        key: &SessionKey,
        status: SessionStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let key = key.to_string();
        let error = error.map(str::to_string);
        self.run(move |store| store.update_status(&key, status, error.as_deref(), Utc::now()))
            .await
            .map(|_| ())
    }

    async fn update_count(&self, key: &SessionKey, count: u64) -> Result<(), StoreError> {
        let key = key.to_string();
        self.run(move |store| store.update_count(&key, count, Utc::now()))
            .await
            .map(|_| ())
    }

    async fn finalize_session(
        &self,
        key: &SessionKey,
        final_count: u64,
    ) -> Result<(), StoreError> {
        let key = key.to_string();
        self.run(move |store| store.finalize_session(&key, final_count, Utc::now()))
            .await
            .map(|_| ())
    }
}

//! In-process sink. Records every call so tests can assert on the exact
//! sequence a worker produced.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ecgstore::SessionRecord;

use super::{SessionStatus, Sink};
use crate::error::StoreError;
use crate::key::SessionKey;
use crate::render::Artifact;

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Init(SessionKey),
    SaveArtifact { key: SessionKey, size: usize },
    UpdateStatus {
        key: SessionKey,
        status: SessionStatus,
        error: Option<String>,
    },
    UpdateCount { key: SessionKey, count: u64 },
    Finalize { key: SessionKey, count: u64 },
}

impl SinkCall {
    pub fn key(&self) -> &SessionKey {
        match self {
            SinkCall::Init(key) => key,
            SinkCall::SaveArtifact { key, .. }
            | SinkCall::UpdateStatus { key, .. }
            | SinkCall::UpdateCount { key, .. }
            | SinkCall::Finalize { key, .. } => key,
        }
    }
}

#[derive(Default)]
struct MemoryState {
    calls: Vec<SinkCall>,
    records: HashMap<SessionKey, SessionRecord>,
    artifacts: HashMap<SessionKey, Vec<Artifact>>,
}

impl MemoryState {
    fn record_mut(&mut self, key: &SessionKey) -> &mut SessionRecord {
        self.records
            .entry(key.clone())
            .or_insert_with(|| SessionRecord::running(key.as_str(), Utc::now()))
    }
}

#[derive(Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
    fail_saves: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `save_artifact` calls fail.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.lock().calls.clone()
    }

    pub fn calls_for(&self, key: &SessionKey) -> Vec<SinkCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.key() == key)
            .cloned()
            .collect()
    }

    pub fn record(&self, key: &SessionKey) -> Option<SessionRecord> {
        self.lock().records.get(key).cloned()
    }

    pub fn artifacts(&self, key: &SessionKey) -> Vec<Artifact> {
        self.lock().artifacts.get(key).cloned().unwrap_or_default()
    }

    pub fn finalize_count(&self, key: &SessionKey) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, SinkCall::Finalize { key: k, .. } if k == key))
            .count()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn init_session(&self, key: &SessionKey) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.calls.push(SinkCall::Init(key.clone()));
        let record = state.record_mut(key);
        record.status = SessionStatus::Running;
        record.started_at = Utc::now();
        record.stopped_at = None;
        record.last_error = None;
        Ok(())
    }

    async fn save_artifact(
        &self,
        key: &SessionKey,
        artifact: &Artifact,
        _duration: Duration,
    ) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("saves disabled".to_string()));
        }
        let mut state = self.lock();
        state.calls.push(SinkCall::SaveArtifact {
            key: key.clone(),
            size: artifact.bytes.len(),
        });
        state
            .artifacts
            .entry(key.clone())
            .or_default()
            .push(artifact.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        key: &SessionKey,
        status: SessionStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.calls.push(SinkCall::UpdateStatus {
            key: key.clone(),
            status,
            error: error.map(str::to_string),
        });
        let record = state.record_mut(key);
        record.status = status;
        record.last_error = error.map(str::to_string);
        if status == SessionStatus::Stopped {
            record.stopped_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn update_count(&self, key: &SessionKey, count: u64) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.calls.push(SinkCall::UpdateCount {
            key: key.clone(),
            count,
        });
        state.record_mut(key).total_images = count;
        Ok(())
    }

    async fn finalize_session(
        &self,
        key: &SessionKey,
        final_count: u64,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.calls.push(SinkCall::Finalize {
            key: key.clone(),
            count: final_count,
        });
        let record = state.record_mut(key);
        record.status = SessionStatus::Stopped;
        record.stopped_at = Some(Utc::now());
        record.total_images = final_count;
        Ok(())
    }
}

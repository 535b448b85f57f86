//! RecordStore: filesystem-backed session records and artifact objects.
//!
//! Layout:
//! ```text
//! {base_path}/
//! ├── sessions/
//! │   └── 42.json            # SessionRecord
//! ├── index/
//! │   └── 42.jsonl           # one ArtifactRecord per line, append-only
//! ├── objects/
//! │   └── ab/
//! │       └── cde123...      # artifact bytes (remainder of hash)
//! └── metadata/
//!     └── ab/
//!         └── cde123....json # {mime_type, size}
//! ```
//!
//! Every method opens and closes its own files. Nothing is cached or pooled,
//! so any number of clones may be used from any number of threads.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::hash::ContentHash;
use crate::record::{
    ArtifactRecord, ObjectMetadata, SessionRecord, SessionStatus, StoredArtifact,
};
use crate::{validate_session, StorageError};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct RecordStore {
    base: PathBuf,
}

impl RecordStore {
    /// Open (creating if needed) a store rooted at `path`.
    pub fn at_path(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let store = Self { base: path.into() };
        for dir in [
            store.sessions_dir(),
            store.index_dir(),
            store.objects_dir(),
            store.metadata_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
        }
        Ok(store)
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }

    fn sessions_dir(&self) -> PathBuf {
        self.base.join("sessions")
    }

    fn index_dir(&self) -> PathBuf {
        self.base.join("index")
    }

    fn objects_dir(&self) -> PathBuf {
        self.base.join("objects")
    }

    fn metadata_dir(&self) -> PathBuf {
        self.base.join("metadata")
    }

    fn session_path(&self, session: &str) -> Result<PathBuf, StorageError> {
        validate_session(session)?;
        Ok(self.sessions_dir().join(format!("{session}.json")))
    }

    fn index_path(&self, session: &str) -> Result<PathBuf, StorageError> {
        validate_session(session)?;
        Ok(self.index_dir().join(format!("{session}.jsonl")))
    }

    fn object_path(&self, hash: &ContentHash) -> PathBuf {
        self.objects_dir().join(hash.prefix()).join(hash.remainder())
    }

    fn metadata_path(&self, hash: &ContentHash) -> PathBuf {
        self.metadata_dir()
            .join(hash.prefix())
            .join(format!("{}.json", hash.remainder()))
    }

    // --- session records ---------------------------------------------------

    /// Create the record, or reset an existing one to `running`.
    ///
    /// Clears `stopped_at` and `last_error`; `total_images` carries over.
    pub fn init_session(
        &self,
        session: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord, StorageError> {
        let record = match self.session(session)? {
            Some(mut existing) => {
                existing.status = SessionStatus::Running;
                existing.started_at = now;
                existing.stopped_at = None;
                existing.last_error = None;
                existing
            }
            None => SessionRecord::running(session, now),
        };
        self.write_session(&record)?;
        Ok(record)
    }

    /// Set the status column. `stopped` also stamps `stopped_at`.
    pub fn update_status(
        &self,
        session: &str,
        status: SessionStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord, StorageError> {
        let mut record = self.session_or_new(session, now)?;
        record.status = status;
        record.last_error = error.map(str::to_string);
        if status == SessionStatus::Stopped {
            record.stopped_at = Some(now);
        }
        self.write_session(&record)?;
        Ok(record)
    }

    pub fn update_count(
        &self,
        session: &str,
        total_images: u64,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord, StorageError> {
        let mut record = self.session_or_new(session, now)?;
        record.total_images = total_images;
        self.write_session(&record)?;
        Ok(record)
    }

    /// Terminal write for a cleanly ended session.
    pub fn finalize_session(
        &self,
        session: &str,
        total_images: u64,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord, StorageError> {
        let mut record = self.session_or_new(session, now)?;
        record.status = SessionStatus::Stopped;
        record.stopped_at = Some(now);
        record.total_images = total_images;
        self.write_session(&record)?;
        Ok(record)
    }

    pub fn session(&self, session: &str) -> Result<Option<SessionRecord>, StorageError> {
        let path = self.session_path(session)?;
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    /// All session records, ordered by key.
    pub fn sessions(&self) -> Result<Vec<SessionRecord>, StorageError> {
        let dir = self.sessions_dir();
        let entries = fs::read_dir(&dir).map_err(|e| StorageError::io(&dir, e))?;

        let mut records = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StorageError::io(&dir, e))?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                records.push(read_json::<SessionRecord>(&path)?);
            }
        }
        records.sort_by(|a, b| a.session.cmp(&b.session));
        Ok(records)
    }

    /// Mark every record still `running` as `error`. Only meaningful before
    /// any worker has started, e.g. at daemon startup after a crash.
    /// Returns the affected session keys.
    pub fn mark_interrupted(
        &self,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, StorageError> {
        let mut interrupted = Vec::new();
        for mut record in self.sessions()? {
            if record.status != SessionStatus::Running {
                continue;
            }
            record.status = SessionStatus::Error;
            record.stopped_at = Some(now);
            record.last_error = Some(reason.to_string());
            self.write_session(&record)?;
            interrupted.push(record.session);
        }
        Ok(interrupted)
    }

    fn session_or_new(
        &self,
        session: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord, StorageError> {
        Ok(self
            .session(session)?
            .unwrap_or_else(|| SessionRecord::running(session, now)))
    }

    fn write_session(&self, record: &SessionRecord) -> Result<(), StorageError> {
        let path = self.session_path(&record.session)?;
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&path, &json)
    }

    // --- artifacts ---------------------------------------------------------

    /// Store artifact bytes and append an index entry for `session`.
    pub fn save_artifact(
        &self,
        session: &str,
        data: &[u8],
        mime_type: &str,
        capture_duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<ArtifactRecord, StorageError> {
        let index_path = self.index_path(session)?;
        let id = self.store_object(data, mime_type)?;

        let record = ArtifactRecord {
            id,
            session: session.to_string(),
            created_at: now,
            capture_duration_ms: capture_duration.as_millis() as u64,
            mime_type: mime_type.to_string(),
            size_bytes: data.len() as u64,
        };

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&index_path)
            .map_err(|e| StorageError::io(&index_path, e))?;
        file.write_all(&line)
            .map_err(|e| StorageError::io(&index_path, e))?;

        Ok(record)
    }

    /// Write-once object storage; existing content is left untouched.
    fn store_object(&self, data: &[u8], mime_type: &str) -> Result<ContentHash, StorageError> {
        let hash = ContentHash::from_data(data);

        let obj_path = self.object_path(&hash);
        if !obj_path.exists() {
            ensure_parent(&obj_path)?;
            write_atomic(&obj_path, data)?;
        }

        let meta_path = self.metadata_path(&hash);
        if !meta_path.exists() {
            ensure_parent(&meta_path)?;
            let metadata = ObjectMetadata {
                mime_type: mime_type.to_string(),
                size: data.len() as u64,
            };
            write_atomic(&meta_path, &serde_json::to_vec(&metadata)?)?;
        }

        Ok(hash)
    }

    /// Artifacts saved for `session`, newest first.
    pub fn artifacts(&self, session: &str) -> Result<Vec<ArtifactRecord>, StorageError> {
        let path = self.index_path(session)?;
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = fs::File::open(&path).map_err(|e| StorageError::io(&path, e))?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| StorageError::io(&path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: ArtifactRecord =
                serde_json::from_str(&line).map_err(|e| StorageError::Corrupt {
                    path: path.clone(),
                    source: e,
                })?;
            records.push(record);
        }

        records.reverse();
        Ok(records)
    }

    pub fn latest_artifacts(
        &self,
        session: &str,
        limit: usize,
    ) -> Result<Vec<ArtifactRecord>, StorageError> {
        let mut records = self.artifacts(session)?;
        records.truncate(limit);
        Ok(records)
    }

    /// Fetch artifact bytes by id. `Ok(None)` if unknown.
    pub fn artifact(&self, id: &ContentHash) -> Result<Option<StoredArtifact>, StorageError> {
        let obj_path = self.object_path(id);
        if !obj_path.exists() {
            return Ok(None);
        }

        let data = fs::read(&obj_path).map_err(|e| StorageError::io(&obj_path, e))?;
        let meta_path = self.metadata_path(id);
        let mime_type = if meta_path.exists() {
            read_json::<ObjectMetadata>(&meta_path)?.mime_type
        } else {
            "application/octet-stream".to_string()
        };

        Ok(Some(StoredArtifact {
            id: id.clone(),
            mime_type,
            data,
        }))
    }
}

fn ensure_parent(path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    }
    Ok(())
}

/// Write to a sibling temp file, then rename over the target.
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let seq = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp = path.with_extension(format!("tmp.{}.{seq}", std::process::id()));
    fs::write(&tmp, data).map_err(|e| StorageError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        StorageError::io(path, e)
    })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
    let bytes = fs::read(path).map_err(|e| StorageError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
        path: path.to_path_buf(),
        source: e,
    })
}

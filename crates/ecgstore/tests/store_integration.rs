//! Exercises RecordStore across reopen and concurrent writers.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use ecgstore::{ContentHash, RecordStore, SessionStatus};
use tempfile::TempDir;

#[test]
fn test_records_survive_reopen() -> Result<()> {
    let dir = TempDir::new()?;

    {
        let store = RecordStore::at_path(dir.path())?;
        store.init_session("42", Utc::now())?;
        store.save_artifact("42", b"window-1", "image/svg+xml", Duration::from_secs(5), Utc::now())?;
        store.finalize_session("42", 1, Utc::now())?;
    }

    let store = RecordStore::at_path(dir.path())?;
    let record = store.session("42")?.expect("session should persist");
    assert_eq!(record.status, SessionStatus::Stopped);
    assert_eq!(record.total_images, 1);

    let artifacts = store.artifacts("42")?;
    assert_eq!(artifacts.len(), 1);
    let stored = store.artifact(&artifacts[0].id)?.expect("object should persist");
    assert_eq!(stored.data, b"window-1");
    Ok(())
}

#[test]
fn test_identical_windows_share_object() -> Result<()> {
    let dir = TempDir::new()?;
    let store = RecordStore::at_path(dir.path())?;

    let a = store.save_artifact("1", b"flatline", "image/svg+xml", Duration::from_secs(5), Utc::now())?;
    let b = store.save_artifact("2", b"flatline", "image/svg+xml", Duration::from_secs(5), Utc::now())?;

    assert_eq!(a.id, b.id);
    assert_eq!(a.id, ContentHash::from_data(b"flatline"));
    assert_eq!(store.artifacts("1")?.len(), 1);
    assert_eq!(store.artifacts("2")?.len(), 1);
    Ok(())
}

#[test]
fn test_concurrent_sessions_write_independently() -> Result<()> {
    let dir = TempDir::new()?;
    let store = Arc::new(RecordStore::at_path(dir.path())?);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || -> Result<()> {
                let key = i.to_string();
                store.init_session(&key, Utc::now())?;
                for n in 0..5u64 {
                    let body = format!("session {i} window {n}");
                    store.save_artifact(&key, body.as_bytes(), "text/plain", Duration::from_secs(5), Utc::now())?;
                    store.update_count(&key, n + 1, Utc::now())?;
                }
                store.finalize_session(&key, 5, Utc::now())?;
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("writer thread panicked")?;
    }

    let sessions = store.sessions()?;
    assert_eq!(sessions.len(), 8);
    for record in sessions {
        assert_eq!(record.status, SessionStatus::Stopped);
        assert_eq!(record.total_images, 5);
        assert_eq!(store.artifacts(&record.session)?.len(), 5);
    }
    Ok(())
}

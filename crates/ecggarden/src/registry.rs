//! SessionRegistry: the single source of truth for "is a capture running
//! for this key".
//!
//! One mutex guards the map. It is held only to look up or swap `Arc`
//! pointers; starting, stopping and waiting on workers happen outside it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::key::SessionKey;

/// Anything the registry can ask "has your worker exited yet?".
pub trait Liveness {
    fn is_live(&self) -> bool;
}

pub struct SessionRegistry<H> {
    entries: Mutex<HashMap<SessionKey, Arc<H>>>,
}

impl<H> Default for SessionRegistry<H> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<H: Liveness> SessionRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    // The map only holds Arc pointers, so a panic while locked cannot leave
    // it half-updated and the poison flag carries no information.
    fn lock(&self) -> MutexGuard<'_, HashMap<SessionKey, Arc<H>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handle` unless a live entry already exists for `key`.
    ///
    /// A stale entry is replaced. Returns false without mutating otherwise.
    pub fn insert(&self, key: SessionKey, handle: Arc<H>) -> bool {
        let mut entries = self.lock();
        if entries.get(&key).is_some_and(|existing| existing.is_live()) {
            return false;
        }
        entries.insert(key, handle);
        true
    }

    pub fn get(&self, key: &SessionKey) -> Option<Arc<H>> {
        self.lock().get(key).cloned()
    }

    pub fn remove(&self, key: &SessionKey) -> Option<Arc<H>> {
        self.lock().remove(key)
    }

    /// Remove the entry for `key` only if it is still `handle`.
    ///
    /// Keeps a late reaper from evicting a newer session started under the
    /// same key.
    pub fn remove_if_same(&self, key: &SessionKey, handle: &Arc<H>) -> bool {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(current) if Arc::ptr_eq(current, handle) => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Sorted snapshot of the registered keys.
    pub fn keys(&self) -> Vec<SessionKey> {
        let mut keys: Vec<_> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Snapshot of every registered entry, sorted by key.
    pub fn entries(&self) -> Vec<(SessionKey, Arc<H>)> {
        let mut entries: Vec<_> = self
            .lock()
            .iter()
            .map(|(key, handle)| (key.clone(), Arc::clone(handle)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

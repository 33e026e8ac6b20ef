//! Registry of per-session locks.
//!
//! Chunk writes take a session's lock shared, so different indices of one
//! session stream in parallel. The completion check, assembly and reaping take
//! it exclusively. Entries are created on first touch and dropped once nobody
//! holds them, which keeps the map bounded by the number of in-flight sessions.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub type SessionLock = Arc<RwLock<()>>;

#[derive(Clone, Default, Debug)]
pub struct SessionLocks {
    inner: Arc<DashMap<String, SessionLock>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock handle for `identifier`, creating it on first touch.
    pub fn handle(&self, identifier: &str) -> SessionLock {
        self.inner
            .entry(identifier.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Give a handle back and drop the registry entry if no one else holds it.
    ///
    /// The strong-count check runs under the map shard lock, the same lock
    /// `handle` clones under, so a concurrent `handle` either keeps the entry
    /// alive or creates a fresh one after removal.
    pub fn release(&self, identifier: &str, handle: SessionLock) {
        drop(handle);
        self.inner
            .remove_if(identifier, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Number of sessions with a live lock entry.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

//! In-memory store.
//!
//! Used for ephemeral sessions and tests. Counts every operation so callers
//! can assert exactly how much I/O a code path performed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{validate_key, PersistentStore, StoreEntry};
use crate::error::{Error, Result};

/// Operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub reads: usize,
    pub writes: usize,
    pub deletes: usize,
    pub lists: usize,
}

impl StoreStats {
    pub fn total(&self) -> usize {
        self.reads + self.writes + self.deletes + self.lists
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    deletes: AtomicUsize,
    lists: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the operation counters
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            reads: self.reads.load(Ordering::SeqCst),
            writes: self.writes.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
            lists: self.lists.load(Ordering::SeqCst),
        }
    }

    /// Make every subsequent write fail with a storage error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of keys currently stored
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        // Entries are replaced whole, so a poisoned map is still consistent
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.lock().contains_key(key))
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.lock().get(key).cloned())
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage(format!("{}: write rejected", key)));
        }

        self.lock().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(self.lock().remove(key).is_some())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoreEntry>> {
        self.lists.fetch_add(1, Ordering::SeqCst);

        let prefix = prefix.trim_end_matches('/');
        let dir = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix)
        };

        Ok(self
            .lock()
            .iter()
            .filter(|(key, _)| key.starts_with(&dir))
            .map(|(key, bytes)| StoreEntry {
                key: key.clone(),
                size: bytes.len() as u64,
            })
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.lock().clear();
        Ok(())
    }
}

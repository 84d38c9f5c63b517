//! Persistent storage for documents, resource payloads and catalog state.
//!
//! # Storage Layout
//!
//! ```text
//! <root>/
//! ├── catalog.json                  # Resource catalog + last-updated timestamp
//! ├── preferences.json              # Download policy
//! ├── documents/
//! │   └── <id:03>.json              # One record per surah
//! ├── resources/
//! │   └── <type>/<id>.bin           # One blob per downloaded resource
//! └── quarantine/                   # Corrupt records moved aside
//! ```
//!
//! Keys are `/`-separated relative paths. Every backend must make writes
//! atomic: a reader sees either the previous value or the new one, never a
//! partially written file.

pub mod content;
pub mod fs;
pub mod lock;
pub mod memory;

use async_trait::async_trait;

use crate::error::{Error, Result};

pub use content::{ContentStore, CATALOG_KEY, PREFERENCES_KEY};
pub use fs::FsStore;
pub use lock::DataDirLock;
pub use memory::{MemoryStore, StoreStats};

/// An enumerated key with its size in bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub key: String,
    pub size: u64,
}

/// Byte-addressable key/value storage
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Check whether a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Read a value, `None` if the key is absent
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Atomically replace the value stored at `key`
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Remove a key; returns whether anything was removed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Enumerate every key under a directory-style prefix (recursively)
    async fn list(&self, prefix: &str) -> Result<Vec<StoreEntry>>;

    /// Remove every key
    async fn clear(&self) -> Result<()>;
}

/// Reject keys that could escape the store root
pub fn validate_key(key: &str) -> Result<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..");

    if bad {
        return Err(Error::Validation(format!("invalid storage key: {:?}", key)));
    }
    Ok(())
}

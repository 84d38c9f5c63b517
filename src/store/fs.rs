//! Filesystem-backed store.
//!
//! Writes go to a temporary file in the destination directory and are then
//! renamed over the target, so readers never observe a partial value.

use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::{validate_key, PersistentStore, StoreEntry};
use crate::error::{Error, Result};

/// Prefix of in-progress temporary files; never listed
const TEMP_PREFIX: &str = ".tmp-";

/// Store rooted at a directory on the local filesystem
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a store rooted at `root` (created on first write)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the store and make sure its root exists
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(root);
        fs::create_dir_all(&store.root)
            .await
            .map_err(|e| Error::storage(store.root.display(), e))?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |path, part| path.join(part)))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }
}

#[async_trait]
impl PersistentStore for FsStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        fs::try_exists(&path)
            .await
            .map_err(|e| Error::storage(key, e))
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage(key, e)),
        }
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&parent)
            .await
            .map_err(|e| Error::storage(parent.display(), e))?;

        let bytes = bytes.to_vec();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut tmp = tempfile::Builder::new()
                .prefix(TEMP_PREFIX)
                .tempfile_in(&parent)
                .map_err(|e| Error::storage(&key, e))?;

            tmp.write_all(&bytes).map_err(|e| Error::storage(&key, e))?;
            tmp.as_file()
                .sync_all()
                .map_err(|e| Error::storage(&key, e))?;
            tmp.persist(&path).map_err(|e| Error::storage(&key, e.error))?;

            Ok(())
        })
        .await
        .map_err(|e| Error::Storage(format!("write task failed: {}", e)))?
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::storage(key, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoreEntry>> {
        let prefix = prefix.trim_end_matches('/');
        let start = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.path_for(prefix)?
        };

        if !fs::try_exists(&start).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let mut pending = vec![start];

        while let Some(dir) = pending.pop() {
            let mut reader = fs::read_dir(&dir)
                .await
                .map_err(|e| Error::storage(dir.display(), e))?;

            while let Some(entry) = reader
                .next_entry()
                .await
                .map_err(|e| Error::storage(dir.display(), e))?
            {
                let name = entry.file_name();
                if name.to_string_lossy().starts_with(TEMP_PREFIX) {
                    continue;
                }

                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| Error::storage(entry.path().display(), e))?;

                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    let size = entry
                        .metadata()
                        .await
                        .map_err(|e| Error::storage(entry.path().display(), e))?
                        .len();
                    if let Some(key) = self.key_for(&entry.path()) {
                        entries.push(StoreEntry { key, size });
                    }
                }
            }
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn clear(&self) -> Result<()> {
        if !fs::try_exists(&self.root).await.unwrap_or(false) {
            return Ok(());
        }

        let mut reader = fs::read_dir(&self.root)
            .await
            .map_err(|e| Error::storage(self.root.display(), e))?;

        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| Error::storage(self.root.display(), e))?
        {
            let path = entry.path();
            let result = if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };
            result.map_err(|e| Error::storage(path.display(), e))?;
        }

        Ok(())
    }
}

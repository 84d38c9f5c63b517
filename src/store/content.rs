//! Typed access to documents and resource payloads on top of a
//! [`PersistentStore`].

use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use super::{PersistentStore, StoreEntry};
use crate::domain::{Document, DocumentId, DocumentMeta, ResourceDescriptor, ResourceId, ResourceType};
use crate::error::{Error, Result};

/// Key of the persisted resource catalog
pub const CATALOG_KEY: &str = "catalog.json";

/// Key of the persisted preferences
pub const PREFERENCES_KEY: &str = "preferences.json";

const DOCUMENTS_DIR: &str = "documents";
const RESOURCES_DIR: &str = "resources";
const QUARANTINE_DIR: &str = "quarantine";

/// Content store shared by the resolver, catalog, queue and accountant
#[derive(Clone)]
pub struct ContentStore {
    backend: Arc<dyn PersistentStore>,
}

impl ContentStore {
    pub fn new(backend: Arc<dyn PersistentStore>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn PersistentStore> {
        &self.backend
    }

    /// Key of a document record (`documents/001.json`)
    pub fn document_key(id: DocumentId) -> String {
        format!("{}/{:03}.json", DOCUMENTS_DIR, id.get())
    }

    /// Key of a resource blob (`resources/translation/en.sahih.bin`)
    pub fn resource_key(resource_type: ResourceType, id: &ResourceId) -> String {
        format!("{}/{}/{}.bin", RESOURCES_DIR, resource_type, id)
    }

    // ------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------

    /// Load a persisted document
    ///
    /// Returns `Ok(None)` when nothing is stored and `Err(Parse)` when the
    /// record exists but is malformed or belongs to another id.
    pub async fn load_document(&self, id: DocumentId) -> Result<Option<Document>> {
        let key = Self::document_key(id);
        let Some(bytes) = self.backend.read(&key).await? else {
            return Ok(None);
        };

        let document = parse_document(&key, &bytes)?;
        if document.id != id {
            return Err(Error::Parse(format!(
                "{} holds document {} instead of {}",
                key, document.id, id
            )));
        }

        Ok(Some(document))
    }

    /// Persist a document, replacing any previous record
    pub async fn save_document(&self, document: &Document) -> Result<()> {
        let key = Self::document_key(document.id);
        let bytes = serde_json::to_vec(document)?;
        self.backend.write(&key, &bytes).await
    }

    /// Metadata of every readable persisted document, sorted by id
    ///
    /// Unreadable records are skipped; they are repaired the next time the
    /// document itself is resolved.
    pub async fn list_document_metas(&self) -> Result<Vec<DocumentMeta>> {
        let mut metas = Vec::new();

        for entry in self.document_entries().await? {
            let Some(bytes) = self.backend.read(&entry.key).await? else {
                continue;
            };
            match parse_document(&entry.key, &bytes) {
                Ok(document) => metas.push(document.meta()),
                Err(e) => warn!(key = %entry.key, error = %e, "Skipping unreadable document record"),
            }
        }

        metas.sort_by_key(|m| m.id);
        metas.dedup_by_key(|m| m.id);
        Ok(metas)
    }

    /// Enumerate persisted document records
    pub async fn document_entries(&self) -> Result<Vec<StoreEntry>> {
        self.backend.list(DOCUMENTS_DIR).await
    }

    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------

    pub async fn has_resource(&self, descriptor: &ResourceDescriptor) -> Result<bool> {
        let key = Self::resource_key(descriptor.resource_type, &descriptor.id);
        self.backend.exists(&key).await
    }

    pub async fn read_resource(&self, descriptor: &ResourceDescriptor) -> Result<Option<Vec<u8>>> {
        let key = Self::resource_key(descriptor.resource_type, &descriptor.id);
        self.backend.read(&key).await
    }

    /// Atomically store a resource payload
    pub async fn write_resource(&self, descriptor: &ResourceDescriptor, bytes: &[u8]) -> Result<()> {
        let key = Self::resource_key(descriptor.resource_type, &descriptor.id);
        self.backend.write(&key, bytes).await
    }

    /// Remove a resource payload; returns whether anything was removed
    pub async fn delete_resource(&self, descriptor: &ResourceDescriptor) -> Result<bool> {
        let key = Self::resource_key(descriptor.resource_type, &descriptor.id);
        self.backend.delete(&key).await
    }

    /// Enumerate persisted resource blobs
    pub async fn resource_entries(&self) -> Result<Vec<StoreEntry>> {
        self.backend.list(RESOURCES_DIR).await
    }

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    /// Load a JSON record; `Err(Parse)` if it exists but does not parse
    pub async fn load_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(bytes) = self.backend.read(key).await? else {
            return Ok(None);
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::Parse(format!("{}: {}", key, e)))
    }

    pub async fn save_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.backend.write(key, &bytes).await
    }

    /// Move a corrupt record aside so it stops poisoning reads
    ///
    /// Returns the quarantine key, or `None` if there was nothing to move.
    pub async fn quarantine(&self, key: &str) -> Result<Option<String>> {
        let Some(bytes) = self.backend.read(key).await? else {
            return Ok(None);
        };

        let target = format!(
            "{}/{}.{}",
            QUARANTINE_DIR,
            key.replace('/', "_"),
            Utc::now().format("%Y%m%dT%H%M%S%.3f")
        );

        self.backend.write(&target, &bytes).await?;
        self.backend.delete(key).await?;

        warn!(%key, quarantine = %target, "Quarantined corrupt record");
        Ok(Some(target))
    }

    /// Remove everything
    pub async fn clear(&self) -> Result<()> {
        self.backend.clear().await
    }
}

fn parse_document(key: &str, bytes: &[u8]) -> Result<Document> {
    let document: Document =
        serde_json::from_slice(bytes).map_err(|e| Error::Parse(format!("{}: {}", key, e)))?;
    document.validate()?;
    Ok(document)
}

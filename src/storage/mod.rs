//! Storage accounting, resource deletion and full reset.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};

use crate::catalog::ResourceCatalog;
use crate::domain::ResourceStatus;
use crate::error::{Error, Result};
use crate::store::ContentStore;

/// Breakdown of bytes held by the content store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    pub documents_bytes: u64,
    pub document_count: usize,
    pub resources_bytes: u64,
    pub resource_count: usize,
}

impl StorageUsage {
    pub fn total(&self) -> u64 {
        self.documents_bytes + self.resources_bytes
    }

    /// Share of the quota in use, `None` when unlimited
    pub fn percent_of(&self, quota_bytes: Option<u64>) -> Option<f64> {
        quota_bytes
            .filter(|q| *q > 0)
            .map(|q| self.total() as f64 * 100.0 / q as f64)
    }
}

/// Accounts for stored bytes and removes them on request
#[derive(Clone)]
pub struct StorageAccountant {
    content: ContentStore,
    catalog: Arc<ResourceCatalog>,
}

impl StorageAccountant {
    pub fn new(content: ContentStore, catalog: Arc<ResourceCatalog>) -> Self {
        Self { content, catalog }
    }

    /// Bytes of every persisted document plus every available resource
    pub async fn used_bytes(&self) -> Result<u64> {
        Ok(self.usage().await?.total())
    }

    pub async fn usage(&self) -> Result<StorageUsage> {
        let mut usage = StorageUsage::default();

        for entry in self.content.document_entries().await? {
            usage.documents_bytes += entry.size;
            usage.document_count += 1;
        }

        let available: HashSet<String> = self
            .catalog
            .list()
            .await
            .iter()
            .filter(|d| d.is_available())
            .map(|d| ContentStore::resource_key(d.resource_type, &d.id))
            .collect();

        for entry in self.content.resource_entries().await? {
            if available.contains(&entry.key) {
                usage.resources_bytes += entry.size;
                usage.resource_count += 1;
            }
        }

        Ok(usage)
    }

    /// Fail with `QuotaExceeded` if `incoming` more bytes would not fit
    pub async fn check_quota(&self, incoming: u64, quota_bytes: Option<u64>) -> Result<()> {
        let Some(quota) = quota_bytes else {
            return Ok(());
        };

        let required = self.used_bytes().await?.saturating_add(incoming);
        if required > quota {
            return Err(Error::QuotaExceeded { required, quota });
        }
        Ok(())
    }

    /// Remove a resource's bytes and mark it `not_available`
    ///
    /// Idempotent for known ids; `Error::NotFound` for unknown ones. Callers
    /// hold the download queue's transition lock.
    #[instrument(skip(self))]
    pub async fn delete_resource(&self, id: &str) -> Result<bool> {
        let descriptor = self.catalog.get_str(id).await?;

        let removed = self.content.delete_resource(&descriptor).await?;

        if descriptor.status != ResourceStatus::NotAvailable {
            self.catalog
                .transition(&descriptor.id, ResourceStatus::NotAvailable)
                .await?;
        }

        info!(resource = %descriptor.id, removed, "Resource deleted");
        Ok(true)
    }

    /// Wipe the content store and re-seed the catalog from the manifest
    ///
    /// Callers hold the download queue's transition lock.
    #[instrument(skip(self))]
    pub async fn clear_all(&self) -> Result<()> {
        self.content.clear().await?;
        self.catalog.reseed().await?;
        info!("All local data cleared");
        Ok(())
    }
}

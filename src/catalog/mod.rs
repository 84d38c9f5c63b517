//! Registry of downloadable resources.
//!
//! The catalog is persisted as a single JSON record. On first run it is
//! seeded from the bundled manifest; afterwards the persisted record wins
//! and the manifest only contributes entries the record does not know yet.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::bundled::Manifest;
use crate::domain::{ResourceDescriptor, ResourceId, ResourceStatus, ResourceType};
use crate::error::{Error, Result};
use crate::store::{ContentStore, CATALOG_KEY};

/// Persisted catalog record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    /// Catalog format version
    pub version: u32,

    /// Last time any descriptor changed
    pub updated_at: DateTime<Utc>,

    pub resources: Vec<ResourceDescriptor>,
}

impl CatalogRecord {
    fn from_manifest(manifest: &Manifest) -> Self {
        Self {
            version: 1,
            updated_at: Utc::now(),
            resources: manifest
                .resources
                .iter()
                .cloned()
                .map(|mut d| {
                    d.status = ResourceStatus::NotAvailable;
                    d
                })
                .collect(),
        }
    }

    fn find(&self, id: &ResourceId) -> Option<&ResourceDescriptor> {
        self.resources.iter().find(|d| &d.id == id)
    }

    fn has_duplicates(&self) -> bool {
        let mut seen = HashSet::new();
        self.resources.iter().any(|d| !seen.insert(&d.id))
    }
}

/// In-memory catalog backed by the content store
pub struct ResourceCatalog {
    content: ContentStore,
    manifest: Manifest,
    state: RwLock<CatalogRecord>,
}

impl ResourceCatalog {
    /// Load the persisted catalog, seeding or repairing it as needed
    #[instrument(skip_all)]
    pub async fn load(content: ContentStore, manifest: Manifest) -> Result<Self> {
        let record = match content.load_json::<CatalogRecord>(CATALOG_KEY).await {
            Ok(Some(record)) if record.has_duplicates() => {
                warn!("Persisted catalog has duplicate ids, re-seeding");
                content.quarantine(CATALOG_KEY).await?;
                Self::seed(&content, &manifest).await?
            }
            Ok(Some(mut record)) => {
                let known: HashSet<ResourceId> =
                    record.resources.iter().map(|d| d.id.clone()).collect();

                let added: Vec<ResourceDescriptor> = manifest
                    .resources
                    .iter()
                    .filter(|d| !known.contains(&d.id))
                    .cloned()
                    .collect();

                if !added.is_empty() {
                    info!(count = added.len(), "Appending new manifest entries");
                    record.resources.extend(added);
                    record.updated_at = Utc::now();
                    content.save_json(CATALOG_KEY, &record).await?;
                }
                record
            }
            Ok(None) => {
                info!("No persisted catalog, seeding from manifest");
                Self::seed(&content, &manifest).await?
            }
            Err(Error::Parse(reason)) => {
                warn!(%reason, "Persisted catalog is corrupt, re-seeding");
                content.quarantine(CATALOG_KEY).await?;
                Self::seed(&content, &manifest).await?
            }
            Err(e) => return Err(e),
        };

        debug!(resources = record.resources.len(), "Catalog loaded");

        Ok(Self {
            content,
            manifest,
            state: RwLock::new(record),
        })
    }

    async fn seed(content: &ContentStore, manifest: &Manifest) -> Result<CatalogRecord> {
        let record = CatalogRecord::from_manifest(manifest);
        content.save_json(CATALOG_KEY, &record).await?;
        Ok(record)
    }

    /// Every descriptor, in catalog order
    pub async fn list(&self) -> Vec<ResourceDescriptor> {
        self.state.read().await.resources.clone()
    }

    /// Descriptors of one type
    pub async fn list_by_type(&self, resource_type: ResourceType) -> Vec<ResourceDescriptor> {
        self.state
            .read()
            .await
            .resources
            .iter()
            .filter(|d| d.resource_type == resource_type)
            .cloned()
            .collect()
    }

    /// Look up a descriptor; `Error::NotFound` for unknown ids
    pub async fn get(&self, id: &ResourceId) -> Result<ResourceDescriptor> {
        self.state
            .read()
            .await
            .find(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("resource {}", id)))
    }

    /// Parse and look up a raw id; malformed ids cannot be in the catalog
    pub async fn get_str(&self, id: &str) -> Result<ResourceDescriptor> {
        let id = ResourceId::new(id).map_err(|_| Error::NotFound(format!("resource {}", id)))?;
        self.get(&id).await
    }

    /// Move a descriptor through the status state machine
    ///
    /// The new state is persisted before it becomes visible in memory.
    pub async fn transition(
        &self,
        id: &ResourceId,
        to: ResourceStatus,
    ) -> Result<ResourceDescriptor> {
        let mut state = self.state.write().await;

        let current = state
            .find(id)
            .ok_or_else(|| Error::NotFound(format!("resource {}", id)))?;

        if !current.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: current.status,
                to,
            });
        }

        let mut next = state.clone();
        let mut updated = None;
        for descriptor in &mut next.resources {
            if &descriptor.id == id {
                descriptor.status = to;
                updated = Some(descriptor.clone());
            }
        }
        next.updated_at = Utc::now();

        self.content.save_json(CATALOG_KEY, &next).await?;
        *state = next;

        debug!(resource = %id, status = %to, "Status changed");
        updated.ok_or_else(|| Error::NotFound(format!("resource {}", id)))
    }

    /// Recompute every status from the presence of backing bytes
    ///
    /// Returns the number of descriptors that changed.
    #[instrument(skip(self))]
    pub async fn refresh_statuses(&self) -> Result<usize> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let mut changed = 0;

        for descriptor in &mut next.resources {
            let observed = if self.content.has_resource(descriptor).await? {
                ResourceStatus::Available
            } else {
                ResourceStatus::NotAvailable
            };

            if descriptor.status != observed {
                debug!(resource = %descriptor.id, from = %descriptor.status, to = %observed, "Reconciled");
                descriptor.status = observed;
                changed += 1;
            }
        }

        if changed > 0 {
            next.updated_at = Utc::now();
            self.content.save_json(CATALOG_KEY, &next).await?;
            *state = next;
            info!(changed, "Catalog statuses reconciled with storage");
        }

        Ok(changed)
    }

    /// Replace the catalog with a fresh copy of the manifest
    pub async fn reseed(&self) -> Result<()> {
        let mut state = self.state.write().await;
        *state = Self::seed(&self.content, &self.manifest).await?;
        Ok(())
    }

    pub async fn updated_at(&self) -> DateTime<Utc> {
        self.state.read().await.updated_at
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }
}

//! Resolution tiers.
//!
//! Each tier is one source a document can come from. The chain asks them in
//! order and stops at the first one that produces a document.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::timeout;

use crate::adapters::ContentFetcher;
use crate::bundled::BundledDataset;
use crate::domain::{Document, DocumentId, Provenance};
use crate::error::{Error, Result};
use crate::store::ContentStore;

/// Result of asking one tier for a document
#[derive(Debug, Clone)]
pub enum TierOutcome {
    /// Usable as-is
    Fresh(Document),

    /// Usable, but a refresh should be attempted in the background
    Stale(Document),

    /// This tier does not have the document
    Miss,
}

/// One source in the resolution chain
#[async_trait]
pub trait Tier: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Provenance stamped on documents this tier produces
    fn provenance(&self) -> Provenance;

    /// Whether a hit from this tier is written back to the content store
    fn writes_through(&self) -> bool {
        true
    }

    /// Whether this tier can refresh stale cache entries
    fn refreshes(&self) -> bool {
        false
    }

    async fn try_resolve(&self, id: DocumentId) -> Result<TierOutcome>;
}

/// Documents previously written to the content store
pub struct CacheTier {
    content: ContentStore,
    freshness: chrono::Duration,
}

impl CacheTier {
    pub fn new(content: ContentStore, freshness: chrono::Duration) -> Self {
        Self { content, freshness }
    }
}

#[async_trait]
impl Tier for CacheTier {
    fn name(&self) -> &str {
        "cache"
    }

    fn provenance(&self) -> Provenance {
        Provenance::Cached
    }

    fn writes_through(&self) -> bool {
        false
    }

    async fn try_resolve(&self, id: DocumentId) -> Result<TierOutcome> {
        let Some(document) = self.content.load_document(id).await? else {
            return Ok(TierOutcome::Miss);
        };

        let stale = document.is_stale(Utc::now(), self.freshness);
        let document = document.with_provenance(Provenance::Cached);

        Ok(if stale {
            TierOutcome::Stale(document)
        } else {
            TierOutcome::Fresh(document)
        })
    }
}

/// Remote fetch, bounded by a timeout
pub struct NetworkTier {
    fetcher: Arc<dyn ContentFetcher>,
    timeout: Duration,
}

impl NetworkTier {
    pub fn new(fetcher: Arc<dyn ContentFetcher>, timeout: Duration) -> Self {
        Self { fetcher, timeout }
    }
}

#[async_trait]
impl Tier for NetworkTier {
    fn name(&self) -> &str {
        "network"
    }

    fn provenance(&self) -> Provenance {
        Provenance::Network
    }

    fn refreshes(&self) -> bool {
        true
    }

    async fn try_resolve(&self, id: DocumentId) -> Result<TierOutcome> {
        let document = timeout(self.timeout, self.fetcher.fetch_document(id))
            .await
            .map_err(|_| {
                Error::Connectivity(format!(
                    "{} timed out after {:?} fetching document {}",
                    self.fetcher.name(),
                    self.timeout,
                    id
                ))
            })?;

        match document {
            Ok(document) if document.id == id => {
                document.validate()?;
                Ok(TierOutcome::Fresh(document.with_provenance(Provenance::Network)))
            }
            Ok(document) => Err(Error::Parse(format!(
                "requested document {} but received {}",
                id, document.id
            ))),
            Err(Error::NotFound(_)) => Ok(TierOutcome::Miss),
            Err(e) => Err(e),
        }
    }
}

/// Documents shipped inside the binary
pub struct BundledTier {
    dataset: Arc<BundledDataset>,
}

impl BundledTier {
    pub fn new(dataset: Arc<BundledDataset>) -> Self {
        Self { dataset }
    }
}

#[async_trait]
impl Tier for BundledTier {
    fn name(&self) -> &str {
        "bundled"
    }

    fn provenance(&self) -> Provenance {
        Provenance::Bundled
    }

    async fn try_resolve(&self, id: DocumentId) -> Result<TierOutcome> {
        Ok(match self.dataset.document(id) {
            Some(document) => TierOutcome::Fresh(document),
            None => TierOutcome::Miss,
        })
    }
}

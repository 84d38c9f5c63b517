//! Adapter interfaces for external systems.
//!
//! Adapters give the resolver and the download queue a narrow view of the
//! outside world: a content fetcher for documents and resource payloads,
//! and a connectivity oracle for the download policy.

pub mod connectivity;
pub mod http;

use async_trait::async_trait;

use crate::domain::{Document, DocumentId, DocumentMeta, ResourceDescriptor};
use crate::error::{Error, Result};

pub use connectivity::{Connectivity, ConnectivityOracle, ManualConnectivity};
pub use http::{HttpFetcher, HttpFetcherConfig};

/// Progress callback: `(downloaded_bytes, total_bytes)`
pub type ProgressFn<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// Trait for remote content sources
///
/// Implementations report transport failures as `Error::Connectivity` and
/// malformed payloads as `Error::Parse`. Timeouts are enforced by callers.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Human-readable fetcher name
    fn name(&self) -> &str;

    /// Fetch one full document
    async fn fetch_document(&self, id: DocumentId) -> Result<Document>;

    /// Fetch lightweight metadata for the whole corpus
    async fn fetch_document_list(&self) -> Result<Vec<DocumentMeta>>;

    /// Fetch a resource payload, reporting progress as bytes arrive
    async fn fetch_resource(
        &self,
        descriptor: &ResourceDescriptor,
        progress: ProgressFn<'_>,
    ) -> Result<Vec<u8>>;
}

/// Fetcher used when no network endpoint is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineFetcher;

#[async_trait]
impl ContentFetcher for OfflineFetcher {
    fn name(&self) -> &str {
        "offline"
    }

    async fn fetch_document(&self, id: DocumentId) -> Result<Document> {
        Err(Error::Connectivity(format!(
            "no network source configured for document {}",
            id
        )))
    }

    async fn fetch_document_list(&self) -> Result<Vec<DocumentMeta>> {
        Err(Error::Connectivity(
            "no network source configured for the document list".to_string(),
        ))
    }

    async fn fetch_resource(
        &self,
        descriptor: &ResourceDescriptor,
        _progress: ProgressFn<'_>,
    ) -> Result<Vec<u8>> {
        Err(Error::Connectivity(format!(
            "no network source configured for resource {}",
            descriptor.id
        )))
    }
}

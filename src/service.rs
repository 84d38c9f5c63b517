//! The study content service.
//!
//! `StudyService` wires the content store, resolution chain, resource
//! catalog, download queue, storage accountant and preferences together and
//! exposes the operations the application calls.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use crate::adapters::{
    ConnectivityOracle, ContentFetcher, HttpFetcher, ManualConnectivity, OfflineFetcher,
};
use crate::bundled::BundledDataset;
use crate::catalog::ResourceCatalog;
use crate::config::ResolvedConfig;
use crate::domain::{Document, DocumentMeta, ResourceDescriptor, ResourceType};
use crate::downloads::{
    DownloadEvent, DownloadQueue, DownloadSettings, DownloadTask, PauseReason, QueueDeps,
};
use crate::error::{Error, Result};
use crate::preferences::{Preferences, PreferencesPatch, PreferencesStore};
use crate::resolver::{ResolutionChain, ResolverSettings};
use crate::storage::{StorageAccountant, StorageUsage};
use crate::store::{ContentStore, DataDirLock, FsStore, MemoryStore, PersistentStore};

/// Tuning for every component
#[derive(Debug, Clone, Default)]
pub struct ServiceSettings {
    pub resolver: ResolverSettings,
    pub downloads: DownloadSettings,
}

/// Builder for [`StudyService`]
///
/// Every collaborator has a default: an in-memory store, the offline
/// fetcher, an unmetered connection and the embedded dataset.
#[derive(Default)]
pub struct StudyServiceBuilder {
    store: Option<Arc<dyn PersistentStore>>,
    fetcher: Option<Arc<dyn ContentFetcher>>,
    connectivity: Option<Arc<dyn ConnectivityOracle>>,
    dataset: Option<Arc<BundledDataset>>,
    settings: ServiceSettings,
    lock: Option<DataDirLock>,
}

impl StudyServiceBuilder {
    pub fn store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn ContentFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn connectivity(mut self, connectivity: Arc<dyn ConnectivityOracle>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub fn dataset(mut self, dataset: Arc<BundledDataset>) -> Self {
        self.dataset = Some(dataset);
        self
    }

    pub fn settings(mut self, settings: ServiceSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Keep a data directory lock alive for as long as the service
    pub fn lock(mut self, lock: DataDirLock) -> Self {
        self.lock = Some(lock);
        self
    }

    #[instrument(skip_all)]
    pub async fn build(self) -> Result<StudyService> {
        let dataset = match self.dataset {
            Some(dataset) => dataset,
            None => Arc::new(BundledDataset::embedded()?),
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn PersistentStore>);
        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(OfflineFetcher) as Arc<dyn ContentFetcher>);
        let connectivity = self.connectivity.unwrap_or_else(|| {
            Arc::new(ManualConnectivity::default()) as Arc<dyn ConnectivityOracle>
        });

        let content = ContentStore::new(store);

        let catalog = Arc::new(
            ResourceCatalog::load(content.clone(), dataset.manifest().clone()).await?,
        );
        catalog.refresh_statuses().await?;

        let preferences = Arc::new(PreferencesStore::load(content.clone()).await?);
        let accountant = StorageAccountant::new(content.clone(), catalog.clone());

        let chain = ResolutionChain::new(
            content.clone(),
            fetcher.clone(),
            dataset.clone(),
            self.settings.resolver,
        );

        let queue = DownloadQueue::start(
            QueueDeps {
                content: content.clone(),
                catalog: catalog.clone(),
                accountant: accountant.clone(),
                fetcher: fetcher.clone(),
                connectivity,
                preferences: preferences.subscribe(),
            },
            self.settings.downloads,
        );

        let service = StudyService {
            content,
            chain,
            catalog,
            queue,
            accountant,
            preferences,
            fetcher_name: fetcher.name().to_string(),
            _lock: self.lock,
        };

        if service.preferences.get().auto_download_favorites {
            service.enqueue_defaults().await;
        }

        info!(fetcher = %service.fetcher_name, "Study service ready");
        Ok(service)
    }
}

/// Offline-first study content service
pub struct StudyService {
    content: ContentStore,
    chain: ResolutionChain,
    catalog: Arc<ResourceCatalog>,
    queue: DownloadQueue,
    accountant: StorageAccountant,
    preferences: Arc<PreferencesStore>,
    fetcher_name: String,
    _lock: Option<DataDirLock>,
}

impl StudyService {
    pub fn builder() -> StudyServiceBuilder {
        StudyServiceBuilder::default()
    }

    /// Open the on-disk service described by a resolved configuration
    pub async fn open(config: &ResolvedConfig) -> Result<Self> {
        let lock = DataDirLock::acquire(config.lock_path())?;
        let store = FsStore::open(config.store_dir()).await?;

        let fetcher: Arc<dyn ContentFetcher> = match &config.endpoints {
            Some(endpoints) => Arc::new(HttpFetcher::new(endpoints.clone())),
            None => Arc::new(OfflineFetcher),
        };

        Self::builder()
            .store(Arc::new(store))
            .fetcher(fetcher)
            .connectivity(Arc::new(ManualConnectivity::new(config.connectivity)))
            .settings(config.settings.clone())
            .lock(lock)
            .build()
            .await
    }

    // ------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------

    /// Resolve a document; fails only for ids outside the corpus
    pub async fn get_document(&self, id: u32) -> Result<Document> {
        self.chain.get_document(id).await
    }

    /// Metadata for every document, sorted by id
    pub async fn get_all_documents(&self) -> Vec<DocumentMeta> {
        self.chain.get_all_documents().await
    }

    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------

    pub async fn get_resource_catalog(&self) -> Vec<ResourceDescriptor> {
        self.catalog.list().await
    }

    pub async fn get_resources_by_type(&self, resource_type: ResourceType) -> Vec<ResourceDescriptor> {
        self.catalog.list_by_type(resource_type).await
    }

    pub async fn get_resource(&self, id: &str) -> Result<ResourceDescriptor> {
        self.catalog.get_str(id).await
    }

    /// Queue a resource; `Ok(false)` if it is available or already queued
    pub async fn request_download(&self, id: &str) -> Result<bool> {
        self.queue.enqueue(id).await
    }

    /// Cancel a queued or active download; `Ok(false)` if none was queued
    pub async fn cancel_download(&self, id: &str) -> Result<bool> {
        self.queue.cancel(id).await
    }

    /// Remove a resource's bytes, cancelling its download first if needed
    pub async fn delete_resource(&self, id: &str) -> Result<bool> {
        self.queue.delete(id).await
    }

    /// Progress of a resource's download, 0..=100
    ///
    /// Available resources report 100; resources that are neither queued nor
    /// available report 0.
    pub async fn get_download_progress(&self, id: &str) -> Result<u8> {
        let descriptor = self.catalog.get_str(id).await?;
        Ok(match self.queue.task(&descriptor.id) {
            Some(task) => task.progress,
            None if descriptor.is_available() => 100,
            None => 0,
        })
    }

    pub async fn is_resource_available(&self, id: &str) -> Result<bool> {
        let descriptor = self.catalog.get_str(id).await?;
        Ok(descriptor.is_available() && self.content.has_resource(&descriptor).await?)
    }

    /// Queued and active downloads, active first
    pub fn download_tasks(&self) -> Vec<DownloadTask> {
        self.queue.tasks()
    }

    pub fn download_paused(&self) -> Option<PauseReason> {
        self.queue.paused()
    }

    pub fn subscribe_downloads(&self) -> broadcast::Receiver<DownloadEvent> {
        self.queue.subscribe()
    }

    // ------------------------------------------------------------------
    // Storage
    // ------------------------------------------------------------------

    pub async fn get_storage_used(&self) -> Result<u64> {
        self.accountant.used_bytes().await
    }

    pub async fn storage_usage(&self) -> Result<StorageUsage> {
        self.accountant.usage().await
    }

    /// Cancel all downloads and wipe every document and resource
    ///
    /// Resolutions and refreshes already running are detached first so none
    /// of them writes a document back after the wipe. Preferences survive the
    /// reset. Returns `false` if anything failed.
    #[instrument(skip(self))]
    pub async fn clear_all_data(&self) -> bool {
        let result: Result<()> = async {
            self.chain.reset().await;
            let cancelled = self.queue.reset().await?;
            info!(cancelled, "Downloads cancelled for reset");
            self.preferences.persist().await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to clear local data");
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Preferences
    // ------------------------------------------------------------------

    pub fn get_preferences(&self) -> Preferences {
        self.preferences.get()
    }

    /// Apply a partial update; turning on auto-download queues the defaults
    pub async fn set_preferences(&self, patch: &PreferencesPatch) -> Result<Preferences> {
        let before = self.preferences.get();
        let after = self.preferences.update(patch).await?;

        if after.auto_download_favorites && !before.auto_download_favorites {
            self.enqueue_defaults().await;
        }
        Ok(after)
    }

    /// Queue every default resource that is not yet available
    async fn enqueue_defaults(&self) -> usize {
        let mut queued = 0;

        for id in self.preferences.get().defaults() {
            match self.queue.enqueue(id.as_str()).await {
                Ok(true) => queued += 1,
                Ok(false) => {}
                Err(Error::NotFound(_)) => {
                    warn!(resource = %id, "Default resource is not in the catalog")
                }
                Err(e) => warn!(resource = %id, error = %e, "Failed to queue default resource"),
            }
        }

        if queued > 0 {
            info!(queued, "Queued default resources");
        }
        queued
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// The resolution chain, for waiting on background refreshes
    pub fn resolver(&self) -> &ResolutionChain {
        &self.chain
    }

    /// Name of the configured network fetcher
    pub fn fetcher_name(&self) -> &str {
        &self.fetcher_name
    }

    /// Stop the download worker and abandon pending refreshes
    pub async fn close(&self) {
        self.queue.close().await;
        self.chain.close().await;
        info!("Study service closed");
    }
}

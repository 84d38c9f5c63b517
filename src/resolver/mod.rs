//! Tiered document resolution.
//!
//! A document is looked up in the content store, then fetched from the
//! network, then taken from the bundled dataset, and finally synthesized as
//! a placeholder. Hits from the network and bundled tiers are written back
//! to the content store.
//!
//! Concurrent requests for the same id share one resolution. A stale cache
//! hit is returned immediately while a single background task refreshes it.
//!
//! Every resolution and refresh records the reset epoch it started under.
//! [`ResolutionChain::reset`] bumps the epoch while holding `writes`
//! exclusively, so a write-through that began before a reset is dropped
//! instead of repopulating a wiped store.

pub mod retry;
pub mod tiers;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{OnceCell, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::adapters::ContentFetcher;
use crate::bundled::BundledDataset;
use crate::domain::{Document, DocumentId, DocumentMeta, Provenance, DOCUMENT_COUNT};
use crate::error::Result;
use crate::store::ContentStore;

pub use retry::RetryPolicy;
pub use tiers::{BundledTier, CacheTier, NetworkTier, Tier, TierOutcome};

/// Resolver tuning
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Maximum cache age before an entry is stale
    pub freshness: chrono::Duration,

    /// Bound on every network request
    pub network_timeout: Duration,

    /// Backoff for background refreshes
    pub refresh_retry: RetryPolicy,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            freshness: chrono::Duration::days(30),
            network_timeout: Duration::from_secs(20),
            refresh_retry: RetryPolicy::default(),
        }
    }
}

type InFlight = Arc<OnceCell<Document>>;

struct Inner {
    tiers: Vec<Arc<dyn Tier>>,
    content: ContentStore,
    fetcher: Arc<dyn ContentFetcher>,
    dataset: Arc<BundledDataset>,
    settings: ResolverSettings,
    in_flight: Mutex<HashMap<DocumentId, InFlight>>,
    refreshing: Mutex<HashSet<DocumentId>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    /// Child of `shutdown`, replaced on every reset
    refresh_token: Mutex<CancellationToken>,
    epoch: AtomicU64,
    writes: RwLock<()>,
}

/// Resolves documents through an ordered list of tiers
#[derive(Clone)]
pub struct ResolutionChain {
    inner: Arc<Inner>,
}

impl ResolutionChain {
    /// Build the standard chain: cache, network, bundled
    pub fn new(
        content: ContentStore,
        fetcher: Arc<dyn ContentFetcher>,
        dataset: Arc<BundledDataset>,
        settings: ResolverSettings,
    ) -> Self {
        let tiers: Vec<Arc<dyn Tier>> = vec![
            Arc::new(CacheTier::new(content.clone(), settings.freshness)),
            Arc::new(NetworkTier::new(fetcher.clone(), settings.network_timeout)),
            Arc::new(BundledTier::new(dataset.clone())),
        ];
        Self::with_tiers(tiers, content, fetcher, dataset, settings)
    }

    /// Build a chain from explicit tiers, asked in the given order
    pub fn with_tiers(
        tiers: Vec<Arc<dyn Tier>>,
        content: ContentStore,
        fetcher: Arc<dyn ContentFetcher>,
        dataset: Arc<BundledDataset>,
        settings: ResolverSettings,
    ) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            inner: Arc::new(Inner {
                tiers,
                content,
                fetcher,
                dataset,
                settings,
                in_flight: Mutex::new(HashMap::new()),
                refreshing: Mutex::new(HashSet::new()),
                tracker: TaskTracker::new(),
                refresh_token: Mutex::new(shutdown.child_token()),
                shutdown,
                epoch: AtomicU64::new(0),
                writes: RwLock::new(()),
            }),
        }
    }

    /// Resolve a document by raw id
    ///
    /// Fails only with `Error::Validation` for an id outside the corpus; no
    /// I/O happens in that case.
    pub async fn get_document(&self, id: u32) -> Result<Document> {
        let id = DocumentId::new(id)?;
        Ok(self.resolve(id).await)
    }

    /// Resolve a validated id; always produces a document
    #[instrument(skip(self), fields(document = %id))]
    pub async fn resolve(&self, id: DocumentId) -> Document {
        let cell = {
            let mut in_flight = lock(&self.inner.in_flight);
            in_flight
                .entry(id)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let document = cell
            .get_or_init(|| self.inner.clone().resolve_uncoalesced(id))
            .await
            .clone();

        let mut in_flight = lock(&self.inner.in_flight);
        if in_flight.get(&id).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
            in_flight.remove(&id);
        }

        document
    }

    /// Lightweight metadata for every document, sorted by id
    #[instrument(skip(self))]
    pub async fn get_all_documents(&self) -> Vec<DocumentMeta> {
        let inner = &self.inner;
        let mut merged: BTreeMap<DocumentId, DocumentMeta> = BTreeMap::new();

        match inner.content.list_document_metas().await {
            Ok(metas) => {
                for meta in metas {
                    merged.insert(meta.id, meta.with_provenance(Provenance::Cached));
                }
            }
            Err(e) => warn!(error = %e, "Failed to list cached documents"),
        }

        if merged.len() < usize::from(DOCUMENT_COUNT) {
            match timeout(inner.settings.network_timeout, inner.fetcher.fetch_document_list()).await {
                Ok(Ok(metas)) => {
                    for meta in metas {
                        merged
                            .entry(meta.id)
                            .or_insert_with(|| meta.with_provenance(Provenance::Network));
                    }
                }
                Ok(Err(e)) => debug!(error = %e, "Network document list unavailable"),
                Err(_) => debug!("Network document list timed out"),
            }
        }

        for meta in inner.dataset.metas() {
            merged.entry(meta.id).or_insert_with(|| meta.clone());
        }

        for id in DocumentId::all() {
            merged.entry(id).or_insert_with(|| DocumentMeta::placeholder(id));
        }

        merged.into_values().collect()
    }

    /// Whether any background refresh is running
    pub fn is_refreshing(&self) -> bool {
        !lock(&self.inner.refreshing).is_empty()
    }

    /// Wait until every background refresh scheduled so far has finished
    pub async fn idle(&self) {
        let tracker = &self.inner.tracker;
        tracker.close();
        tracker.wait().await;
        tracker.reopen();
    }

    /// Forget every in-flight resolution and refresh before a store wipe
    ///
    /// Refresh tasks are cancelled and awaited. Resolutions still running
    /// return their document but no longer write it back.
    #[instrument(skip(self))]
    pub async fn reset(&self) {
        let inner = &self.inner;

        {
            let _writes = inner.writes.write().await;
            inner.epoch.fetch_add(1, Ordering::SeqCst);
        }

        let previous = std::mem::replace(
            &mut *lock(&inner.refresh_token),
            inner.shutdown.child_token(),
        );
        previous.cancel();
        lock(&inner.in_flight).clear();

        self.idle().await;
        debug!("Resolver reset");
    }

    /// Abandon pending refreshes and wait for their tasks to exit
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}

impl Inner {
    async fn resolve_uncoalesced(self: Arc<Self>, id: DocumentId) -> Document {
        let epoch = self.epoch.load(Ordering::SeqCst);

        for tier in &self.tiers {
            match tier.try_resolve(id).await {
                Ok(TierOutcome::Fresh(document)) => {
                    debug!(tier = tier.name(), "Resolved");
                    if tier.writes_through() {
                        return self.write_through(document, tier.provenance(), epoch).await;
                    }
                    return document;
                }
                Ok(TierOutcome::Stale(document)) => {
                    debug!(tier = tier.name(), "Resolved stale entry");
                    self.schedule_refresh(id);
                    return document;
                }
                Ok(TierOutcome::Miss) => debug!(tier = tier.name(), "Miss"),
                Err(e) => warn!(tier = tier.name(), error = %e, "Tier failed, trying next"),
            }
        }

        info!("No tier has the document, synthesizing placeholder");
        Document::placeholder(id, self.dataset.meta(id))
    }

    /// Stamp and persist a document; persistence failures are logged only
    ///
    /// Nothing is written if a reset happened after `epoch` was taken.
    async fn write_through(
        &self,
        document: Document,
        provenance: Provenance,
        epoch: u64,
    ) -> Document {
        let mut document = document.with_provenance(provenance);

        let _writes = self.writes.read().await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(document = %document.id, "Dropping write-through from before a reset");
            return document;
        }

        document.cached_at = Some(Utc::now());
        if let Err(e) = self.content.save_document(&document).await {
            warn!(document = %document.id, error = %e, "Write-through failed");
        }

        document
    }

    fn schedule_refresh(self: &Arc<Self>, id: DocumentId) {
        if self.shutdown.is_cancelled() {
            return;
        }
        if !lock(&self.refreshing).insert(id) {
            debug!(document = %id, "Refresh already in flight");
            return;
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let token = lock(&self.refresh_token).clone();
        let inner = Arc::clone(self);
        self.tracker.spawn(async move {
            inner.refresh(id, epoch, &token).await;
            lock(&inner.refreshing).remove(&id);
        });
    }

    async fn refresh(&self, id: DocumentId, epoch: u64, token: &CancellationToken) {
        let policy = &self.settings.refresh_retry;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = self.refresh_once(id, epoch) => result,
            };

            match result {
                Ok(true) => {
                    info!(document = %id, attempt, "Refreshed stale document");
                    return;
                }
                Ok(false) => {
                    debug!(document = %id, "No refresh source has the document");
                    return;
                }
                Err(e) if policy.should_retry(attempt) => {
                    let delay = policy.delay_for_attempt(attempt);
                    debug!(document = %id, attempt, ?delay, error = %e, "Refresh failed, retrying");

                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    warn!(document = %id, attempt, error = %e, "Refresh abandoned");
                    return;
                }
            }
        }
    }

    /// One pass over the refresh sources; `Ok(true)` if the cache was updated
    async fn refresh_once(&self, id: DocumentId, epoch: u64) -> Result<bool> {
        let mut last_error = None;

        for tier in self.tiers.iter().filter(|t| t.refreshes()) {
            match tier.try_resolve(id).await {
                Ok(TierOutcome::Fresh(document)) | Ok(TierOutcome::Stale(document)) => {
                    self.write_through(document, tier.provenance(), epoch).await;
                    return Ok(true);
                }
                Ok(TierOutcome::Miss) => {}
                Err(e) => last_error = Some(e),
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(false),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

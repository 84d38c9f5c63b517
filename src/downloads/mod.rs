//! Background resource download queue.
//!
//! # Concurrency Model
//!
//! - One long-lived worker drains a strict FIFO
//! - The handle wakes the worker over an mpsc channel; the worker also
//!   watches connectivity and preferences so a paused queue resumes by itself
//! - `transition_lock` serializes every catalog status change, including
//!   resource deletion and the full reset, so queue membership and
//!   descriptor status never disagree
//! - Each active transfer owns a child of the shutdown token
//!
//! Lock order: `transition_lock` → `state`.

mod events;
mod worker;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{ConnectivityOracle, ContentFetcher};
use crate::catalog::ResourceCatalog;
use crate::domain::{ResourceId, ResourceStatus};
use crate::error::Result;
use crate::preferences::Preferences;
use crate::storage::StorageAccountant;
use crate::store::ContentStore;

pub use events::{DownloadEvent, DownloadTask, PauseReason};

const EVENT_CAPACITY: usize = 256;

/// Queue tuning
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    /// Bound on a single transfer
    pub timeout: Duration,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
        }
    }
}

/// Collaborators the queue reads from and writes to
pub struct QueueDeps {
    pub content: ContentStore,
    pub catalog: Arc<ResourceCatalog>,
    pub accountant: StorageAccountant,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub connectivity: Arc<dyn ConnectivityOracle>,
    pub preferences: watch::Receiver<Preferences>,
}

#[derive(Debug)]
enum QueueSignal {
    Wake,
}

struct ActiveTransfer {
    task: DownloadTask,
    token: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<DownloadTask>,
    active: Option<ActiveTransfer>,
    paused: Option<PauseReason>,
}

impl QueueState {
    fn contains(&self, id: &ResourceId) -> bool {
        self.active.as_ref().is_some_and(|a| &a.task.resource_id == id)
            || self.pending.iter().any(|t| &t.resource_id == id)
    }

    fn len(&self) -> usize {
        self.pending.len() + usize::from(self.active.is_some())
    }
}

struct Shared {
    deps: QueueDeps,
    settings: DownloadSettings,
    state: Mutex<QueueState>,
    transition_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<DownloadEvent>,
    active_tx: watch::Sender<Option<ResourceId>>,
    shutdown: CancellationToken,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: DownloadEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Handle to the download queue and its worker
pub struct DownloadQueue {
    shared: Arc<Shared>,
    signals: mpsc::UnboundedSender<QueueSignal>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DownloadQueue {
    /// Create the queue and spawn its worker
    pub fn start(deps: QueueDeps, settings: DownloadSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (active_tx, _) = watch::channel(None);
        let (signals, signal_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            deps,
            settings,
            state: Mutex::new(QueueState::default()),
            transition_lock: tokio::sync::Mutex::new(()),
            events,
            active_tx,
            shutdown: CancellationToken::new(),
        });

        let worker = tokio::spawn(worker::run(shared.clone(), signal_rx));

        Self {
            shared,
            signals,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue a resource for download
    ///
    /// Returns `Ok(false)` if it is already available or already queued, and
    /// `Error::NotFound` if the id is unknown.
    #[instrument(skip(self))]
    pub async fn enqueue(&self, id: &str) -> Result<bool> {
        let _guard = self.shared.transition_lock.lock().await;
        let descriptor = self.shared.deps.catalog.get_str(id).await?;

        if descriptor.is_available() {
            debug!(resource = %descriptor.id, "Already available");
            return Ok(false);
        }
        let queued = self.shared.state().contains(&descriptor.id);
        if queued {
            debug!(resource = %descriptor.id, "Already queued");
            return Ok(false);
        }

        if descriptor.status != ResourceStatus::Downloading {
            self.shared
                .deps
                .catalog
                .transition(&descriptor.id, ResourceStatus::Downloading)
                .await?;
        }

        let position = {
            let mut state = self.shared.state();
            state
                .pending
                .push_back(DownloadTask::new(descriptor.id.clone(), descriptor.size_bytes));
            state.len()
        };

        info!(resource = %descriptor.id, position, "Queued download");
        self.shared.emit(DownloadEvent::Queued {
            id: descriptor.id,
            position,
        });
        self.wake();

        Ok(true)
    }

    /// Cancel a queued or active download
    ///
    /// Returns once the descriptor is back to `not_available`. `Ok(false)`
    /// if the resource was not queued.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: &str) -> Result<bool> {
        let guard = self.shared.transition_lock.lock().await;
        let descriptor = self.shared.deps.catalog.get_str(id).await?;

        let pending = {
            let mut state = self.shared.state();
            if let Some(pos) = state
                .pending
                .iter()
                .position(|t| t.resource_id == descriptor.id)
            {
                state.pending.remove(pos);
                true
            } else if let Some(active) = state
                .active
                .as_ref()
                .filter(|a| a.task.resource_id == descriptor.id)
            {
                active.token.cancel();
                false
            } else {
                return Ok(false);
            }
        };

        if pending {
            self.shared
                .deps
                .catalog
                .transition(&descriptor.id, ResourceStatus::NotAvailable)
                .await?;
            info!(resource = %descriptor.id, "Cancelled queued download");
            self.shared.emit(DownloadEvent::Cancelled { id: descriptor.id });
            return Ok(true);
        }

        // The worker needs the lock to clean up the aborted transfer
        drop(guard);
        self.wait_until_inactive(&descriptor.id).await;
        Ok(true)
    }

    /// Remove a resource's bytes, cancelling its download first
    ///
    /// Cancellation, byte removal and the status change all happen under
    /// `transition_lock`, so no request can slip in between them.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let descriptor = self.shared.deps.catalog.get_str(id).await?;

        let (_guard, _) = self.quiesce(Some(&descriptor.id)).await;
        self.shared.deps.accountant.delete_resource(id).await
    }

    /// Cancel everything and wipe stored content under `transition_lock`
    ///
    /// Returns the number of downloads that were cancelled.
    #[instrument(skip(self))]
    pub async fn reset(&self) -> Result<usize> {
        let (_guard, cancelled) = self.quiesce(None).await;
        self.shared.deps.accountant.clear_all().await?;
        Ok(cancelled)
    }

    /// Take `transition_lock` once no matching download is queued or active
    ///
    /// Pending tasks are dropped under the lock. An active transfer is
    /// cancelled and the lock released so the worker can settle it, then the
    /// check starts over.
    async fn quiesce(
        &self,
        only: Option<&ResourceId>,
    ) -> (tokio::sync::MutexGuard<'_, ()>, usize) {
        let selected = |id: &ResourceId| only.map_or(true, |only| only == id);
        let mut cancelled = 0;

        loop {
            let guard = self.shared.transition_lock.lock().await;

            let (removed, active) = {
                let mut state = self.shared.state();
                let (removed, kept): (Vec<DownloadTask>, Vec<DownloadTask>) = state
                    .pending
                    .drain(..)
                    .partition(|t| selected(&t.resource_id));
                state.pending = kept.into();
                let active = state
                    .active
                    .as_ref()
                    .filter(|a| selected(&a.task.resource_id))
                    .map(|a| {
                        a.token.cancel();
                        a.task.resource_id.clone()
                    });
                (removed, active)
            };

            for task in &removed {
                if let Err(e) = self
                    .shared
                    .deps
                    .catalog
                    .transition(&task.resource_id, ResourceStatus::NotAvailable)
                    .await
                {
                    warn!(resource = %task.resource_id, error = %e, "Failed to revert cancelled download");
                }
                self.shared.emit(DownloadEvent::Cancelled {
                    id: task.resource_id.clone(),
                });
            }
            cancelled += removed.len();

            match active {
                None => return (guard, cancelled),
                Some(id) => {
                    drop(guard);
                    self.wait_until_inactive(&id).await;
                    cancelled += 1;
                }
            }
        }
    }

    async fn wait_until_inactive(&self, id: &ResourceId) {
        let mut rx = self.shared.active_tx.subscribe();
        // Err only if the worker is gone, in which case nothing is active
        let _ = rx.wait_for(|active| active.as_ref() != Some(id)).await;
    }

    /// Tracking record for a queued or active download
    pub fn task(&self, id: &ResourceId) -> Option<DownloadTask> {
        let state = self.shared.state();
        state
            .active
            .as_ref()
            .map(|a| &a.task)
            .filter(|t| &t.resource_id == id)
            .or_else(|| state.pending.iter().find(|t| &t.resource_id == id))
            .cloned()
    }

    /// Snapshot of the queue, active transfer first
    pub fn tasks(&self) -> Vec<DownloadTask> {
        let state = self.shared.state();
        state
            .active
            .iter()
            .map(|a| a.task.clone())
            .chain(state.pending.iter().cloned())
            .collect()
    }

    /// Why the worker is currently paused, if it is
    pub fn paused(&self) -> Option<PauseReason> {
        self.shared.state().paused
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.shared.events.subscribe()
    }

    /// Ask the worker to re-evaluate its gate
    pub fn wake(&self) {
        // Fails only after close
        let _ = self.signals.send(QueueSignal::Wake);
    }

    /// Stop the worker, aborting any active transfer
    pub async fn close(&self) {
        self.shared.shutdown.cancel();

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Download worker exited abnormally");
            }
        }
    }
}

impl Drop for DownloadQueue {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

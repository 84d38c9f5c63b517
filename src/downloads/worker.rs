//! The single download worker.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ActiveTransfer, DownloadEvent, PauseReason, QueueSignal, Shared};
use crate::domain::{ResourceId, ResourceStatus};
use crate::error::{Error, Result};

pub(super) async fn run(shared: Arc<Shared>, mut signals: mpsc::UnboundedReceiver<QueueSignal>) {
    let mut connectivity = shared.deps.connectivity.subscribe();
    let mut preferences = shared.deps.preferences.clone();
    let mut connectivity_open = true;
    let mut preferences_open = true;

    debug!("Download worker started");

    loop {
        shared.drain().await;

        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            signal = signals.recv() => {
                if signal.is_none() {
                    break;
                }
            }
            changed = connectivity.changed(), if connectivity_open => {
                if changed.is_err() {
                    connectivity_open = false;
                }
            }
            changed = preferences.changed(), if preferences_open => {
                if changed.is_err() {
                    preferences_open = false;
                }
            }
        }
    }

    debug!("Download worker stopped");
}

impl Shared {
    /// Process queued items until the queue is empty or the gate closes
    async fn drain(&self) {
        loop {
            if self.shutdown.is_cancelled() {
                return;
            }

            let gate = self.gate();
            let (id, token) = {
                let mut state = self.state();
                if state.pending.is_empty() {
                    state.paused = None;
                    return;
                }

                if let Some(reason) = gate {
                    if state.paused != Some(reason) {
                        state.paused = Some(reason);
                        let queued = state.pending.len();
                        drop(state);
                        info!(%reason, queued, "Downloads paused");
                        self.emit(DownloadEvent::Paused { reason, queued });
                    }
                    return;
                }

                state.paused = None;
                let Some(task) = state.pending.pop_front() else {
                    return;
                };
                let id = task.resource_id.clone();
                let token = self.shutdown.child_token();
                state.active = Some(ActiveTransfer {
                    task,
                    token: token.clone(),
                });
                (id, token)
            };

            self.active_tx.send_replace(Some(id.clone()));
            info!(resource = %id, "Download started");
            self.emit(DownloadEvent::Started { id: id.clone() });

            let outcome = self.transfer(&id, &token).await;
            self.finish(&id, &token, outcome).await;
        }
    }

    /// Reason the head of the queue may not start right now
    fn gate(&self) -> Option<PauseReason> {
        let connectivity = self.deps.connectivity.current();
        let unmetered_only = self.deps.preferences.borrow().download_on_unmetered_only;

        if !connectivity.is_connected() {
            Some(PauseReason::Offline)
        } else if unmetered_only && !connectivity.is_unmetered() {
            Some(PauseReason::Metered)
        } else {
            None
        }
    }

    async fn transfer(&self, id: &ResourceId, token: &CancellationToken) -> Result<u64> {
        let descriptor = self.deps.catalog.get(id).await?;
        let quota = self.deps.preferences.borrow().quota_bytes();

        if let Some(size) = descriptor.size_bytes {
            self.deps.accountant.check_quota(size, quota).await?;
        }

        let progress = |downloaded: u64, total: Option<u64>| self.record_progress(id, downloaded, total);

        let bytes = tokio::select! {
            _ = token.cancelled() => return Err(Error::Cancelled),
            result = timeout(
                self.settings.timeout,
                self.deps.fetcher.fetch_resource(&descriptor, &progress),
            ) => result.map_err(|_| {
                Error::Connectivity(format!(
                    "transfer of {} timed out after {:?}",
                    id, self.settings.timeout
                ))
            })??,
        };

        if let Some(expected) = &descriptor.sha256 {
            let actual = hex::encode(Sha256::digest(&bytes));
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(Error::Parse(format!(
                    "checksum mismatch for {}: expected {}, got {}",
                    id, expected, actual
                )));
            }
        }

        self.deps
            .accountant
            .check_quota(bytes.len() as u64, quota)
            .await?;

        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        self.deps.content.write_resource(&descriptor, &bytes).await?;
        Ok(bytes.len() as u64)
    }

    fn record_progress(&self, id: &ResourceId, downloaded: u64, total: Option<u64>) {
        let event = {
            let mut state = self.state();
            let Some(active) = state.active.as_mut().filter(|a| &a.task.resource_id == id) else {
                return;
            };
            if !active.task.record(downloaded, total) {
                return;
            }
            DownloadEvent::Progress {
                id: id.clone(),
                downloaded: active.task.downloaded_bytes,
                total: active.task.total_bytes,
                percent: active.task.progress,
            }
        };
        self.emit(event);
    }

    /// Settle the descriptor status and clear the active transfer
    async fn finish(&self, id: &ResourceId, token: &CancellationToken, outcome: Result<u64>) {
        let _guard = self.transition_lock.lock().await;

        let outcome = match outcome {
            Ok(_) if token.is_cancelled() => {
                // Cancelled after the bytes landed
                if let Ok(descriptor) = self.deps.catalog.get(id).await {
                    if let Err(e) = self.deps.content.delete_resource(&descriptor).await {
                        warn!(resource = %id, error = %e, "Failed to remove cancelled payload");
                    }
                }
                Err(Error::Cancelled)
            }
            other => other,
        };

        let (status, event) = match outcome {
            Ok(bytes) => {
                let percent_event = {
                    let mut state = self.state();
                    state.active.as_mut().map(|active| {
                        active.task.complete();
                        DownloadEvent::Progress {
                            id: id.clone(),
                            downloaded: active.task.downloaded_bytes,
                            total: active.task.total_bytes,
                            percent: 100,
                        }
                    })
                };
                if let Some(event) = percent_event {
                    self.emit(event);
                }
                info!(resource = %id, bytes, "Download completed");
                (ResourceStatus::Available, DownloadEvent::Completed { id: id.clone(), bytes })
            }
            Err(Error::Cancelled) => {
                info!(resource = %id, "Download cancelled");
                (ResourceStatus::NotAvailable, DownloadEvent::Cancelled { id: id.clone() })
            }
            Err(e) => {
                warn!(resource = %id, error = %e, "Download failed");
                (
                    ResourceStatus::Error,
                    DownloadEvent::Failed {
                        id: id.clone(),
                        error: e.to_string(),
                    },
                )
            }
        };

        if let Err(e) = self.deps.catalog.transition(id, status).await {
            error!(resource = %id, %status, error = %e, "Failed to record download outcome");
        }

        self.state().active = None;
        self.active_tx.send_replace(None);
        self.emit(event);
    }
}

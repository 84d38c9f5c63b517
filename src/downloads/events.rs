//! Download tracking records and lifecycle events.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::ResourceId;

/// Transient record for a queued or active download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTask {
    pub resource_id: ResourceId,

    /// 0..=100
    pub progress: u8,

    pub downloaded_bytes: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
}

impl DownloadTask {
    pub fn new(resource_id: ResourceId, total_bytes: Option<u64>) -> Self {
        Self {
            resource_id,
            progress: 0,
            downloaded_bytes: 0,
            total_bytes,
        }
    }

    /// Record transferred bytes; returns whether the percentage changed
    pub fn record(&mut self, downloaded: u64, total: Option<u64>) -> bool {
        self.downloaded_bytes = downloaded;
        if total.is_some() {
            self.total_bytes = total;
        }

        let progress = match self.total_bytes {
            Some(total) if total > 0 => (downloaded.min(total) * 100 / total) as u8,
            _ => self.progress,
        };

        let changed = progress != self.progress;
        self.progress = progress;
        changed
    }

    pub fn complete(&mut self) {
        self.progress = 100;
        if self.total_bytes.is_none() {
            self.total_bytes = Some(self.downloaded_bytes);
        }
    }
}

/// Why the worker stopped before the head of the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// No connection at all
    Offline,

    /// Connection is metered and downloads are restricted to unmetered ones
    Metered,
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PauseReason::Offline => write!(f, "offline"),
            PauseReason::Metered => write!(f, "waiting for an unmetered connection"),
        }
    }
}

/// Download lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadEvent {
    /// Added to the queue (position 1 = next to run)
    Queued { id: ResourceId, position: usize },

    Started { id: ResourceId },

    Progress {
        id: ResourceId,
        downloaded: u64,
        total: Option<u64>,
        percent: u8,
    },

    /// Worker stopped with items still queued
    Paused { reason: PauseReason, queued: usize },

    Completed { id: ResourceId, bytes: u64 },

    Failed { id: ResourceId, error: String },

    Cancelled { id: ResourceId },
}

impl DownloadEvent {
    /// Resource the event concerns, if any
    pub fn resource_id(&self) -> Option<&ResourceId> {
        match self {
            DownloadEvent::Queued { id, .. }
            | DownloadEvent::Started { id }
            | DownloadEvent::Progress { id, .. }
            | DownloadEvent::Completed { id, .. }
            | DownloadEvent::Failed { id, .. }
            | DownloadEvent::Cancelled { id } => Some(id),
            DownloadEvent::Paused { .. } => None,
        }
    }

    /// Whether this event ends a download
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadEvent::Completed { .. }
                | DownloadEvent::Failed { .. }
                | DownloadEvent::Cancelled { .. }
        )
    }
}

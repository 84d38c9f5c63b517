//! mushaf - Offline-first content for a Quran study app
//!
//! Resolves surahs through a chain of sources (local cache, network,
//! bundled data, generated placeholder) so reading never fails, and manages
//! downloadable translations, recitations and commentaries under a storage
//! quota and a connectivity policy.
//!
//! # Architecture
//!
//! - Documents resolve through a fixed tier order; network results are
//!   written back to the cache and stale cache hits refresh in the background
//! - Resources move through `not_available → downloading → available | error`
//!   and are transferred one at a time by a FIFO queue
//! - All state lives in a key/value store behind a single trait
//!
//! # Modules
//!
//! - `domain`: Data structures (Document, Unit, ResourceDescriptor)
//! - `store`: Persistent key/value storage (filesystem, in-memory)
//! - `resolver`: Tiered document resolution
//! - `catalog`: Resource catalog and status transitions
//! - `downloads`: Download queue and worker
//! - `storage`: Usage accounting, deletion and reset
//! - `preferences`: Download policy
//! - `adapters`: Network fetchers and connectivity
//! - `service`: The `StudyService` facade
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Read a surah
//! mushaf read 1
//!
//! # Download a translation
//! mushaf download en.sahih
//!
//! # Check storage
//! mushaf storage
//! ```

pub mod adapters;
pub mod bundled;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod domain;
pub mod downloads;
pub mod error;
pub mod preferences;
pub mod resolver;
pub mod service;
pub mod storage;
pub mod store;

// Re-export main types at crate root for convenience
pub use domain::{
    Classification, Document, DocumentId, DocumentMeta, Provenance, ResourceDescriptor,
    ResourceId, ResourceStatus, ResourceType, Unit,
};
pub use error::{Error, ErrorKind, Result};
pub use service::{ServiceSettings, StudyService, StudyServiceBuilder};

pub use downloads::{DownloadEvent, DownloadTask, PauseReason};
pub use preferences::{Preferences, PreferencesPatch};
pub use storage::StorageUsage;

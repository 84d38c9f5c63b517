//! Domain types for the study content corpus.
//!
//! This module contains the core data structures:
//! - Document / Unit: surahs and their ayahs
//! - ResourceDescriptor: downloadable translations, recitations, commentaries

pub mod document;
pub mod resource;

// Re-export commonly used types
pub use document::{
    Classification, Document, DocumentId, DocumentMeta, Provenance, Unit, DOCUMENT_COUNT,
    PLACEHOLDER_TEXT,
};
pub use resource::{ResourceDescriptor, ResourceId, ResourceStatus, ResourceType};

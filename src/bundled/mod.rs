//! Read-only dataset shipped inside the binary.
//!
//! Three JSON snapshots are embedded at compile time:
//! - `surahs.json`: the index (metadata for every document)
//! - `documents.json`: full bodies for a small subset of documents
//! - `manifest.json`: the resource manifest the catalog is seeded from

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::domain::{
    Classification, Document, DocumentId, DocumentMeta, Provenance, ResourceDescriptor,
    ResourceStatus, Unit,
};
use crate::error::{Error, Result};

const SURAHS_JSON: &str = include_str!("../../assets/surahs.json");
const DOCUMENTS_JSON: &str = include_str!("../../assets/documents.json");
const MANIFEST_JSON: &str = include_str!("../../assets/manifest.json");

/// Resource manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub resources: Vec<ResourceDescriptor>,
}

impl Manifest {
    /// Parse and validate a manifest; every entry starts as `not_available`
    pub fn from_json(json: &str) -> Result<Self> {
        let mut manifest: Manifest =
            serde_json::from_str(json).map_err(|e| Error::Parse(format!("manifest: {}", e)))?;

        let mut seen = HashSet::new();
        for descriptor in &mut manifest.resources {
            if !seen.insert(descriptor.id.clone()) {
                return Err(Error::Parse(format!(
                    "manifest: duplicate resource id {}",
                    descriptor.id
                )));
            }
            descriptor.status = ResourceStatus::NotAvailable;
        }

        Ok(manifest)
    }
}

#[derive(Debug, Deserialize)]
struct IndexEntry {
    id: DocumentId,
    name: String,
    translated_name: String,
    unit_count: u16,
    #[serde(default)]
    classification: Classification,
}

#[derive(Debug, Deserialize)]
struct BodyEntry {
    id: DocumentId,
    units: Vec<BodyUnit>,
}

#[derive(Debug, Deserialize)]
struct BodyUnit {
    number: u16,
    text: String,
    #[serde(default)]
    translation: Option<String>,
    #[serde(default)]
    transliteration: Option<String>,
    #[serde(default)]
    audio_ref: Option<String>,
}

/// In-memory snapshot of the shipped dataset
#[derive(Debug, Clone)]
pub struct BundledDataset {
    index: BTreeMap<DocumentId, DocumentMeta>,
    bodies: BTreeMap<DocumentId, Document>,
    manifest: Manifest,
}

impl BundledDataset {
    /// Load the dataset embedded in the binary
    pub fn embedded() -> Result<Self> {
        Self::from_json(SURAHS_JSON, DOCUMENTS_JSON, MANIFEST_JSON)
    }

    /// Build a dataset from JSON snapshots
    ///
    /// Bodies must reference an indexed id and satisfy the document
    /// invariants, otherwise the whole dataset is rejected.
    pub fn from_json(index_json: &str, documents_json: &str, manifest_json: &str) -> Result<Self> {
        let entries: Vec<IndexEntry> = serde_json::from_str(index_json)
            .map_err(|e| Error::Parse(format!("bundled index: {}", e)))?;

        let mut index = BTreeMap::new();
        for entry in entries {
            let meta = DocumentMeta {
                id: entry.id,
                name: entry.name,
                translated_name: entry.translated_name,
                unit_count: entry.unit_count,
                classification: entry.classification,
                provenance: Provenance::Bundled,
            };
            if index.insert(meta.id, meta).is_some() {
                return Err(Error::Parse(format!("bundled index: duplicate id {}", entry.id)));
            }
        }

        let entries: Vec<BodyEntry> = serde_json::from_str(documents_json)
            .map_err(|e| Error::Parse(format!("bundled documents: {}", e)))?;

        let mut bodies = BTreeMap::new();
        for entry in entries {
            let meta = index.get(&entry.id).cloned().ok_or_else(|| {
                Error::Parse(format!("bundled documents: {} is not in the index", entry.id))
            })?;

            let units = entry
                .units
                .into_iter()
                .map(|u| Unit {
                    number: u.number,
                    text: u.text,
                    translation: u.translation,
                    transliteration: u.transliteration,
                    audio_ref: u.audio_ref,
                    provenance: Provenance::Bundled,
                })
                .collect();

            let document = Document::from_meta(meta, units);
            document.validate()?;
            bodies.insert(document.id, document);
        }

        Ok(Self {
            index,
            bodies,
            manifest: Manifest::from_json(manifest_json)?,
        })
    }

    /// Full body of a bundled document, if shipped
    pub fn document(&self, id: DocumentId) -> Option<Document> {
        self.bodies.get(&id).cloned()
    }

    /// Index metadata for a document
    pub fn meta(&self, id: DocumentId) -> Option<&DocumentMeta> {
        self.index.get(&id)
    }

    /// All index metadata, sorted by id
    pub fn metas(&self) -> impl Iterator<Item = &DocumentMeta> {
        self.index.values()
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Ids with a shipped body
    pub fn document_ids(&self) -> Vec<DocumentId> {
        self.bodies.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DOCUMENT_COUNT;

    #[test]
    fn test_embedded_index_is_complete() {
        let dataset = BundledDataset::embedded().unwrap();

        let ids: Vec<u16> = dataset.metas().map(|m| m.id.get()).collect();
        assert_eq!(ids, (1..=DOCUMENT_COUNT).collect::<Vec<_>>());

        let total: u32 = dataset.metas().map(|m| u32::from(m.unit_count)).sum();
        assert_eq!(total, 6236);

        let baqarah = dataset.meta(DocumentId::new(2).unwrap()).unwrap();
        assert_eq!(baqarah.unit_count, 286);
        assert_eq!(baqarah.classification, Classification::Medinan);
    }

    #[test]
    fn test_embedded_bodies() {
        let dataset = BundledDataset::embedded().unwrap();

        let fatiha = dataset.document(DocumentId::new(1).unwrap()).unwrap();
        assert_eq!(fatiha.units.len(), 7);
        assert_eq!(fatiha.provenance, Provenance::Bundled);
        assert!(fatiha.units.iter().all(|u| u.translation.is_some()));

        assert!(dataset.document(DocumentId::new(2).unwrap()).is_none());
        assert!(dataset.document_ids().contains(&DocumentId::new(112).unwrap()));
    }

    #[test]
    fn test_embedded_manifest() {
        let dataset = BundledDataset::embedded().unwrap();
        let manifest = dataset.manifest();

        assert!(manifest.resources.iter().any(|r| r.id.as_str() == "en.sahih"));
        assert!(manifest.resources.iter().any(|r| r.id.as_str() == "ar.alafasy"));
        assert!(manifest
            .resources
            .iter()
            .all(|r| r.status == ResourceStatus::NotAvailable));
    }

    #[test]
    fn test_manifest_rejects_duplicates() {
        let json = r#"{"version":1,"resources":[
            {"id":"en.sahih","type":"translation","language":"en","name":"A"},
            {"id":"en.sahih","type":"translation","language":"en","name":"B"}
        ]}"#;
        assert!(matches!(Manifest::from_json(json), Err(Error::Parse(_))));
    }

    #[test]
    fn test_body_must_be_indexed() {
        let index = r#"[{"id":1,"name":"A","translated_name":"a","unit_count":1}]"#;
        let bodies = r#"[{"id":2,"units":[{"number":1,"text":"x"}]}]"#;
        let manifest = r#"{"version":1,"resources":[]}"#;
        assert!(BundledDataset::from_json(index, bodies, manifest).is_err());
    }

    #[test]
    fn test_body_must_match_declared_count() {
        let index = r#"[{"id":1,"name":"A","translated_name":"a","unit_count":2}]"#;
        let bodies = r#"[{"id":1,"units":[{"number":1,"text":"x"}]}]"#;
        let manifest = r#"{"version":1,"resources":[]}"#;
        assert!(BundledDataset::from_json(index, bodies, manifest).is_err());
    }
}

//! Documents (surahs) and their units (ayahs).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of documents in the corpus
pub const DOCUMENT_COUNT: u16 = 114;

/// Text of the single unit carried by a synthesized placeholder
pub const PLACEHOLDER_TEXT: &str =
    "This surah is not available offline yet. Connect to the internet to load it.";

/// Document identifier, guaranteed to be within 1..=DOCUMENT_COUNT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct DocumentId(u16);

impl DocumentId {
    /// Validate a raw id
    pub fn new(id: u32) -> Result<Self> {
        if id == 0 || id > u32::from(DOCUMENT_COUNT) {
            return Err(Error::Validation(format!(
                "document id {} is outside 1..={}",
                id, DOCUMENT_COUNT
            )));
        }
        Ok(Self(id as u16))
    }

    /// Get the numeric value
    pub fn get(self) -> u16 {
        self.0
    }

    /// Iterate every id in the corpus, in order
    pub fn all() -> impl Iterator<Item = DocumentId> {
        (1..=DOCUMENT_COUNT).map(DocumentId)
    }
}

impl TryFrom<u32> for DocumentId {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Self::new(value)
    }
}

impl From<DocumentId> for u32 {
    fn from(id: DocumentId) -> Self {
        u32::from(id.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let raw: u32 = s
            .trim()
            .parse()
            .map_err(|_| Error::Validation(format!("not a document id: {}", s)))?;
        Self::new(raw)
    }
}

/// Where a document (or unit) came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Read back from the local content store
    Cached,

    /// Fetched from the network
    Network,

    /// Shipped with the application
    Bundled,

    /// Synthesized placeholder
    Generated,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Cached => write!(f, "cached"),
            Provenance::Network => write!(f, "network"),
            Provenance::Bundled => write!(f, "bundled"),
            Provenance::Generated => write!(f, "generated"),
        }
    }
}

/// Revelation classification of a surah
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    #[serde(alias = "makki", alias = "makkah")]
    Meccan,

    #[serde(alias = "madani", alias = "madinah")]
    Medinan,

    #[default]
    Unknown,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Meccan => write!(f, "meccan"),
            Classification::Medinan => write!(f, "medinan"),
            Classification::Unknown => write!(f, "unknown"),
        }
    }
}

/// Smallest addressable element of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// 1-based position within the parent document
    pub number: u16,

    /// Display text
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transliteration: Option<String>,

    /// Reference to the unit's audio within a recitation resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_ref: Option<String>,

    pub provenance: Provenance,
}

impl Unit {
    /// Create a unit with only display text
    pub fn new(number: u16, text: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            number,
            text: text.into(),
            translation: None,
            transliteration: None,
            audio_ref: None,
            provenance,
        }
    }
}

/// Lightweight projection of a document, without unit bodies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: DocumentId,
    pub name: String,
    pub translated_name: String,
    pub unit_count: u16,
    #[serde(default)]
    pub classification: Classification,
    pub provenance: Provenance,
}

impl DocumentMeta {
    /// Metadata for an id nothing else knows about
    pub fn placeholder(id: DocumentId) -> Self {
        Self {
            id,
            name: format!("Surah {}", id),
            translated_name: String::new(),
            unit_count: 0,
            classification: Classification::Unknown,
            provenance: Provenance::Generated,
        }
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }
}

/// A chapter-level content unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub name: String,
    pub translated_name: String,

    /// Declared number of units
    pub unit_count: u16,

    #[serde(default)]
    pub classification: Classification,

    pub units: Vec<Unit>,

    pub provenance: Provenance,

    /// When this document was written to the content store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
}

impl Document {
    /// Build a document from metadata and units; units are re-tagged with the
    /// metadata's provenance
    pub fn from_meta(meta: DocumentMeta, units: Vec<Unit>) -> Self {
        let doc = Self {
            id: meta.id,
            name: meta.name,
            translated_name: meta.translated_name,
            unit_count: meta.unit_count,
            classification: meta.classification,
            units,
            provenance: meta.provenance,
            cached_at: None,
        };
        doc.with_provenance(meta.provenance)
    }

    /// Synthesize a placeholder that tells the reader the content is unavailable
    pub fn placeholder(id: DocumentId, meta: Option<&DocumentMeta>) -> Self {
        let meta = meta
            .cloned()
            .unwrap_or_else(|| DocumentMeta::placeholder(id))
            .with_provenance(Provenance::Generated);

        Self::from_meta(meta, vec![Unit::new(1, PLACEHOLDER_TEXT, Provenance::Generated)])
    }

    /// Re-tag the document and all of its units
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        for unit in &mut self.units {
            unit.provenance = provenance;
        }
        self
    }

    /// Check structural invariants
    pub fn validate(&self) -> Result<()> {
        for (idx, unit) in self.units.iter().enumerate() {
            let expected = idx + 1;
            if usize::from(unit.number) != expected {
                return Err(Error::Parse(format!(
                    "document {}: unit at position {} is numbered {}",
                    self.id, expected, unit.number
                )));
            }
        }

        // Placeholders carry one unit regardless of the declared count
        if self.provenance != Provenance::Generated
            && usize::from(self.unit_count) != self.units.len()
        {
            return Err(Error::Parse(format!(
                "document {}: declares {} units but has {}",
                self.id,
                self.unit_count,
                self.units.len()
            )));
        }

        Ok(())
    }

    /// Whether the cached copy is older than the freshness threshold
    pub fn is_stale(&self, now: DateTime<Utc>, freshness: Duration) -> bool {
        match self.cached_at {
            Some(cached_at) => now - cached_at > freshness,
            None => true,
        }
    }

    /// Whether this is a synthesized placeholder
    pub fn is_placeholder(&self) -> bool {
        self.provenance == Provenance::Generated
    }

    /// Lightweight projection
    pub fn meta(&self) -> DocumentMeta {
        DocumentMeta {
            id: self.id,
            name: self.name.clone(),
            translated_name: self.translated_name.clone(),
            unit_count: self.unit_count,
            classification: self.classification,
            provenance: self.provenance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(units: u16) -> Document {
        let meta = DocumentMeta {
            id: DocumentId::new(112).unwrap(),
            name: "Al-Ikhlas".to_string(),
            translated_name: "The Sincerity".to_string(),
            unit_count: units,
            classification: Classification::Meccan,
            provenance: Provenance::Network,
        };
        let units = (1..=units)
            .map(|n| Unit::new(n, format!("ayah {}", n), Provenance::Bundled))
            .collect();
        Document::from_meta(meta, units)
    }

    #[test]
    fn test_document_id_bounds() {
        assert!(DocumentId::new(0).is_err());
        assert!(DocumentId::new(1).is_ok());
        assert!(DocumentId::new(114).is_ok());

        let err = DocumentId::new(200).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        assert_eq!(DocumentId::all().count(), 114);
        assert_eq!("36".parse::<DocumentId>().unwrap().get(), 36);
        assert!("abc".parse::<DocumentId>().is_err());
    }

    #[test]
    fn test_document_id_rejected_at_deserialization() {
        assert!(serde_json::from_str::<DocumentId>("115").is_err());
        assert_eq!(serde_json::from_str::<DocumentId>("7").unwrap().get(), 7);
    }

    #[test]
    fn test_from_meta_tags_units() {
        let doc = sample(4);
        assert_eq!(doc.provenance, Provenance::Network);
        assert!(doc.units.iter().all(|u| u.provenance == Provenance::Network));
        assert!(doc.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_gaps() {
        let mut doc = sample(4);
        doc.units.remove(1);
        doc.unit_count = 3;
        assert!(matches!(doc.validate(), Err(Error::Parse(_))));
    }

    #[test]
    fn test_validate_rejects_count_mismatch() {
        let mut doc = sample(4);
        doc.unit_count = 5;
        assert!(doc.validate().is_err());
    }

    #[test]
    fn test_placeholder() {
        let id = DocumentId::new(9).unwrap();
        let doc = Document::placeholder(id, None);

        assert!(doc.is_placeholder());
        assert_eq!(doc.units.len(), 1);
        assert_eq!(doc.units[0].text, PLACEHOLDER_TEXT);
        assert!(doc.validate().is_ok());

        let known = sample(4).meta();
        let doc = Document::placeholder(known.id, Some(&known));
        assert_eq!(doc.name, "Al-Ikhlas");
        assert_eq!(doc.provenance, Provenance::Generated);
    }

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let mut doc = sample(4);
        assert!(doc.is_stale(now, Duration::days(30)));

        doc.cached_at = Some(now - Duration::days(29));
        assert!(!doc.is_stale(now, Duration::days(30)));

        doc.cached_at = Some(now - Duration::days(31));
        assert!(doc.is_stale(now, Duration::days(30)));
    }
}

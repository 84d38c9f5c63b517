//! Downloadable resources and their status state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Opaque resource identifier (e.g. `en.sahih`)
///
/// Restricted to ASCII letters, digits, `.`, `_` and `-` so it can be used
/// directly as a storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let valid = !id.is_empty()
            && id != "."
            && id != ".."
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

        if !valid {
            return Err(Error::Validation(format!("invalid resource id: {:?}", id)));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ResourceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.0
    }
}

impl FromStr for ResourceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type of resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// Translation text set
    Translation,

    /// Audio recitation set
    Recitation,

    /// Commentary (tafsir)
    Commentary,
}

impl ResourceType {
    pub const ALL: [ResourceType; 3] = [
        ResourceType::Translation,
        ResourceType::Recitation,
        ResourceType::Commentary,
    ];
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceType::Translation => write!(f, "translation"),
            ResourceType::Recitation => write!(f, "recitation"),
            ResourceType::Commentary => write!(f, "commentary"),
        }
    }
}

impl FromStr for ResourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "translation" | "translations" => Ok(ResourceType::Translation),
            "recitation" | "recitations" | "audio" => Ok(ResourceType::Recitation),
            "commentary" | "tafsir" => Ok(ResourceType::Commentary),
            _ => Err(Error::Validation(format!("Unknown resource type: {}", s))),
        }
    }
}

/// Download status of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    #[default]
    NotAvailable,
    Downloading,
    Available,
    Error,
}

impl ResourceStatus {
    /// Whether `self → to` is a legal transition
    ///
    /// ```text
    /// not_available → downloading → available | error
    /// downloading   → not_available   (cancel)
    /// available     → not_available   (delete)
    /// error         → downloading     (retry)
    /// error         → not_available   (delete)
    /// ```
    pub fn can_transition_to(self, to: ResourceStatus) -> bool {
        use ResourceStatus::*;

        matches!(
            (self, to),
            (NotAvailable, Downloading)
                | (Downloading, Available)
                | (Downloading, Error)
                | (Downloading, NotAvailable)
                | (Available, NotAvailable)
                | (Error, Downloading)
                | (Error, NotAvailable)
        )
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceStatus::NotAvailable => write!(f, "not_available"),
            ResourceStatus::Downloading => write!(f, "downloading"),
            ResourceStatus::Available => write!(f, "available"),
            ResourceStatus::Error => write!(f, "error"),
        }
    }
}

/// A downloadable resource known to the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub id: ResourceId,

    #[serde(rename = "type")]
    pub resource_type: ResourceType,

    /// BCP-47 style language tag
    pub language: String,

    /// Human-readable name
    pub name: String,

    /// Advertised payload size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Hex-encoded SHA-256 of the payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    #[serde(default)]
    pub status: ResourceStatus,
}

impl ResourceDescriptor {
    pub fn new(
        id: ResourceId,
        resource_type: ResourceType,
        language: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            resource_type,
            language: language.into(),
            name: name.into(),
            size_bytes: None,
            version: None,
            sha256: None,
            status: ResourceStatus::NotAvailable,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == ResourceStatus::Available
    }
}

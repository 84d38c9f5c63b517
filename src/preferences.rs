//! Download policy preferences.

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::domain::{ResourceId, ResourceType};
use crate::error::{Error, Result};
use crate::store::{ContentStore, PREFERENCES_KEY};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// User-configured download policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Queue resources listed as defaults automatically
    #[serde(default)]
    pub auto_download_favorites: bool,

    #[serde(default = "default_translation")]
    pub default_translation: Option<ResourceId>,

    #[serde(default = "default_recitation")]
    pub default_recitation: Option<ResourceId>,

    #[serde(default)]
    pub default_commentary: Option<ResourceId>,

    /// Only transfer large resources over unmetered connections
    #[serde(default = "default_true", alias = "download_on_wifi_only")]
    pub download_on_unmetered_only: bool,

    /// Storage ceiling in MB; 0 means unlimited
    #[serde(default = "default_quota_mb")]
    pub storage_quota_mb: u64,
}

fn default_translation() -> Option<ResourceId> {
    ResourceId::new("en.sahih").ok()
}
fn default_recitation() -> Option<ResourceId> {
    ResourceId::new("ar.alafasy").ok()
}
fn default_true() -> bool {
    true
}
fn default_quota_mb() -> u64 {
    2048
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            auto_download_favorites: false,
            default_translation: default_translation(),
            default_recitation: default_recitation(),
            default_commentary: None,
            download_on_unmetered_only: default_true(),
            storage_quota_mb: default_quota_mb(),
        }
    }
}

impl Preferences {
    /// Quota in bytes, `None` when unlimited
    pub fn quota_bytes(&self) -> Option<u64> {
        match self.storage_quota_mb {
            0 => None,
            mb => Some(mb.saturating_mul(BYTES_PER_MB)),
        }
    }

    /// Preferred default for a resource type
    pub fn default_for(&self, resource_type: ResourceType) -> Option<&ResourceId> {
        match resource_type {
            ResourceType::Translation => self.default_translation.as_ref(),
            ResourceType::Recitation => self.default_recitation.as_ref(),
            ResourceType::Commentary => self.default_commentary.as_ref(),
        }
    }

    /// All configured defaults, in type order
    pub fn defaults(&self) -> Vec<ResourceId> {
        ResourceType::ALL
            .iter()
            .filter_map(|t| self.default_for(*t).cloned())
            .collect()
    }

    /// Apply a partial update
    pub fn apply(mut self, patch: &PreferencesPatch) -> Self {
        if let Some(v) = patch.auto_download_favorites {
            self.auto_download_favorites = v;
        }
        if let Some(v) = &patch.default_translation {
            self.default_translation = Some(v.clone());
        }
        if let Some(v) = &patch.default_recitation {
            self.default_recitation = Some(v.clone());
        }
        if let Some(v) = &patch.default_commentary {
            self.default_commentary = Some(v.clone());
        }
        if let Some(v) = patch.download_on_unmetered_only {
            self.download_on_unmetered_only = v;
        }
        if let Some(v) = patch.storage_quota_mb {
            self.storage_quota_mb = v;
        }
        self
    }
}

/// Partial update to [`Preferences`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferencesPatch {
    pub auto_download_favorites: Option<bool>,
    pub default_translation: Option<ResourceId>,
    pub default_recitation: Option<ResourceId>,
    pub default_commentary: Option<ResourceId>,
    pub download_on_unmetered_only: Option<bool>,
    pub storage_quota_mb: Option<u64>,
}

impl PreferencesPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Persisted preferences with change notification
pub struct PreferencesStore {
    content: ContentStore,
    tx: watch::Sender<Preferences>,
    write_lock: Mutex<()>,
}

impl PreferencesStore {
    /// Load persisted preferences, falling back to defaults
    pub async fn load(content: ContentStore) -> Result<Self> {
        let prefs = match content.load_json::<Preferences>(PREFERENCES_KEY).await {
            Ok(Some(prefs)) => prefs,
            Ok(None) => Preferences::default(),
            Err(Error::Parse(reason)) => {
                warn!(%reason, "Persisted preferences are corrupt, using defaults");
                content.quarantine(PREFERENCES_KEY).await?;
                Preferences::default()
            }
            Err(e) => return Err(e),
        };

        let (tx, _rx) = watch::channel(prefs);
        Ok(Self {
            content,
            tx,
            write_lock: Mutex::new(()),
        })
    }

    /// Current preferences
    pub fn get(&self) -> Preferences {
        self.tx.borrow().clone()
    }

    /// Persist and publish a partial update
    pub async fn update(&self, patch: &PreferencesPatch) -> Result<Preferences> {
        let _guard = self.write_lock.lock().await;

        let next = self.get().apply(patch);
        self.content.save_json(PREFERENCES_KEY, &next).await?;
        self.tx.send_replace(next.clone());

        info!(?patch, "Preferences updated");
        Ok(next)
    }

    /// Write the current preferences back to the store
    pub async fn persist(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.content.save_json(PREFERENCES_KEY, &self.get()).await
    }

    pub fn subscribe(&self) -> watch::Receiver<Preferences> {
        self.tx.subscribe()
    }
}

//! Configuration for mushaf.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (MUSHAF_HOME)
//! 2. Config file (.mushaf/config.yaml)
//! 3. Defaults (~/.mushaf, no network source)
//!
//! Config file discovery:
//! - Searches current directory and parents for .mushaf/config.yaml
//! - Paths in config file are relative to the .mushaf/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::adapters::{Connectivity, HttpFetcherConfig};
use crate::resolver::RetryPolicy;
use crate::service::ServiceSettings;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub network: Option<NetworkConfig>,
    #[serde(default)]
    pub cache: Option<CacheConfig>,
    #[serde(default)]
    pub downloads: Option<DownloadsConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Data directory (relative to .mushaf/)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkConfig {
    /// Template with `{id}`
    pub document_url: Option<String>,
    pub document_list_url: Option<String>,
    /// Template with `{type}` and `{id}`
    pub resource_url: Option<String>,
    pub timeout_seconds: Option<u64>,
    /// Connection state reported to the download queue
    pub connectivity: Option<Connectivity>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    pub freshness_days: Option<u32>,
    pub refresh_retry: Option<RetryPolicy>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadsConfig {
    pub timeout_seconds: Option<u64>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to the mushaf data directory
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Network endpoints, `None` for offline-only operation
    pub endpoints: Option<HttpFetcherConfig>,
    pub connectivity: Connectivity,
    pub settings: ServiceSettings,
}

impl ResolvedConfig {
    /// Configuration with defaults rooted at `home`
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            config_file: None,
            endpoints: None,
            connectivity: Connectivity::default(),
            settings: ServiceSettings::default(),
        }
    }

    /// Root of the content store
    pub fn store_dir(&self) -> PathBuf {
        self.home.join("store")
    }

    /// Lock file guarding the data directory
    pub fn lock_path(&self) -> PathBuf {
        self.home.join("mushaf.lock")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".mushaf").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Endpoints are all-or-nothing
fn resolve_endpoints(network: &NetworkConfig) -> Result<Option<HttpFetcherConfig>> {
    match (
        &network.document_url,
        &network.document_list_url,
        &network.resource_url,
    ) {
        (None, None, None) => Ok(None),
        (Some(document_url), Some(document_list_url), Some(resource_url)) => {
            Ok(Some(HttpFetcherConfig {
                document_url: document_url.clone(),
                document_list_url: document_list_url.clone(),
                resource_url: resource_url.clone(),
            }))
        }
        _ => bail!("network config needs document_url, document_list_url and resource_url together"),
    }
}

/// Apply a parsed config file on top of defaults
fn apply_config_file(
    resolved: &mut ResolvedConfig,
    config: &ConfigFile,
    config_dir: &Path,
) -> Result<()> {
    if let Some(ref home) = config.paths.home {
        resolved.home = resolve_path(config_dir, home);
    }

    if let Some(ref network) = config.network {
        resolved.endpoints = resolve_endpoints(network)?;
        if let Some(seconds) = network.timeout_seconds {
            resolved.settings.resolver.network_timeout = Duration::from_secs(seconds);
        }
        if let Some(connectivity) = network.connectivity {
            resolved.connectivity = connectivity;
        }
    }

    if let Some(ref cache) = config.cache {
        if let Some(days) = cache.freshness_days {
            resolved.settings.resolver.freshness = chrono::Duration::days(i64::from(days));
        }
        if let Some(ref retry) = cache.refresh_retry {
            resolved.settings.resolver.refresh_retry = retry.clone();
        }
    }

    if let Some(seconds) = config.downloads.as_ref().and_then(|d| d.timeout_seconds) {
        resolved.settings.downloads.timeout = Duration::from_secs(seconds);
    }

    Ok(())
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    // Default home directory
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".mushaf");

    let mut resolved = ResolvedConfig::with_home(default_home);

    // Check for config file
    if let Some(config_path) = find_config_file() {
        let config = load_config_file(&config_path)?;
        let config_dir = config_path.parent().unwrap_or(Path::new("."));
        apply_config_file(&mut resolved, &config, config_dir)?;
        resolved.config_file = Some(config_path);
    }

    if let Ok(env_home) = std::env::var("MUSHAF_HOME") {
        resolved.home = PathBuf::from(env_home);
    }

    Ok(resolved)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => bail!("{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const FULL_CONFIG: &str = r#"
version: "1.0"
paths:
  home: ./data
network:
  document_url: "https://content.example/surah/{id}.json"
  document_list_url: "https://content.example/surahs.json"
  resource_url: "https://content.example/{type}/{id}.bin"
  timeout_seconds: 5
  connectivity: metered
cache:
  freshness_days: 7
  refresh_retry:
    max_attempts: 5
downloads:
  timeout_seconds: 120
"#;

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let mushaf_dir = temp.path().join(".mushaf");
        std::fs::create_dir_all(&mushaf_dir).unwrap();

        let config_path = mushaf_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "{}", FULL_CONFIG).unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version.as_deref(), Some("1.0"));
        assert_eq!(config.paths.home, Some("./data".to_string()));

        let mut resolved = ResolvedConfig::with_home("/unused");
        apply_config_file(&mut resolved, &config, &mushaf_dir).unwrap();

        assert_eq!(resolved.home, mushaf_dir.join("./data"));
        assert_eq!(resolved.connectivity, Connectivity::Metered);
        assert_eq!(resolved.settings.resolver.network_timeout, Duration::from_secs(5));
        assert_eq!(resolved.settings.resolver.freshness, chrono::Duration::days(7));
        assert_eq!(resolved.settings.resolver.refresh_retry.max_attempts, 5);
        assert_eq!(resolved.settings.downloads.timeout, Duration::from_secs(120));
        assert_eq!(
            resolved.endpoints.unwrap().resource_url,
            "https://content.example/{type}/{id}.bin"
        );
    }

    #[test]
    fn test_defaults() {
        let resolved = ResolvedConfig::with_home("/data/.mushaf");

        assert!(resolved.endpoints.is_none());
        assert_eq!(resolved.connectivity, Connectivity::Unmetered);
        assert_eq!(resolved.settings.resolver.freshness, chrono::Duration::days(30));
        assert_eq!(resolved.settings.resolver.network_timeout, Duration::from_secs(20));
        assert_eq!(resolved.settings.downloads.timeout, Duration::from_secs(600));
        assert_eq!(resolved.store_dir(), PathBuf::from("/data/.mushaf/store"));
        assert_eq!(resolved.lock_path(), PathBuf::from("/data/.mushaf/mushaf.lock"));
    }

    #[test]
    fn test_partial_endpoints_rejected() {
        let network = NetworkConfig {
            document_url: Some("https://content.example/{id}".to_string()),
            ..Default::default()
        };
        assert!(resolve_endpoints(&network).is_err());
        assert!(resolve_endpoints(&NetworkConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project/.mushaf");

        assert_eq!(
            resolve_path(&base, "./data"),
            PathBuf::from("/home/user/project/.mushaf/./data")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}

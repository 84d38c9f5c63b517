//! Command-line interface for mushaf.
//!
//! Provides commands for reading surahs, browsing the resource catalog,
//! downloading and deleting resources, inspecting storage, and managing
//! download preferences.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;

use crate::config;
use crate::domain::{ResourceId, ResourceType};
use crate::downloads::DownloadEvent;
use crate::preferences::PreferencesPatch;
use crate::service::StudyService;

/// mushaf - Offline-first Quran study content
#[derive(Parser, Debug)]
#[command(name = "mushaf")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print a surah
    Read {
        /// Surah number (1-114)
        id: u32,

        /// Print translations under each ayah
        #[arg(short, long)]
        translation: bool,
    },

    /// List every surah
    List,

    /// List downloadable resources
    Resources {
        /// Filter by resource type (translation, recitation, commentary)
        #[arg(short = 't', long = "type")]
        resource_type: Option<ResourceType>,
    },

    /// Download a resource and wait for it to finish
    Download {
        /// Resource ID (e.g., "en.sahih")
        resource_id: String,
    },

    /// Delete a downloaded resource
    Delete {
        /// Resource ID
        resource_id: String,
    },

    /// Show storage usage
    Storage,

    /// Delete every cached document and downloaded resource
    Clear {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },

    /// Show or change download preferences
    #[command(subcommand)]
    Prefs(PrefsCommands),

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Subcommand, Debug)]
pub enum PrefsCommands {
    /// Print current preferences
    Show,

    /// Change one or more preferences
    Set {
        /// Queue default resources automatically
        #[arg(long)]
        auto_download: Option<bool>,

        /// Default translation resource ID
        #[arg(long)]
        translation: Option<String>,

        /// Default recitation resource ID
        #[arg(long)]
        recitation: Option<String>,

        /// Default commentary resource ID
        #[arg(long)]
        commentary: Option<String>,

        /// Only download over unmetered connections
        #[arg(long)]
        unmetered_only: Option<bool>,

        /// Storage quota in MB (0 = unlimited)
        #[arg(long)]
        quota_mb: Option<u64>,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        if let Commands::Config = self.command {
            return show_config();
        }

        let cfg = config::config()?;
        let service = StudyService::open(cfg)
            .await
            .with_context(|| format!("Failed to open data directory {}", cfg.home.display()))?;

        let result = match self.command {
            Commands::Read { id, translation } => read_document(&service, id, translation).await,
            Commands::List => list_documents(&service).await,
            Commands::Resources { resource_type } => list_resources(&service, resource_type).await,
            Commands::Download { resource_id } => download(&service, &resource_id).await,
            Commands::Delete { resource_id } => delete(&service, &resource_id).await,
            Commands::Storage => show_storage(&service).await,
            Commands::Clear { yes } => clear(&service, yes).await,
            Commands::Prefs(PrefsCommands::Show) => show_preferences(&service),
            Commands::Prefs(PrefsCommands::Set {
                auto_download,
                translation,
                recitation,
                commentary,
                unmetered_only,
                quota_mb,
            }) => {
                let patch = PreferencesPatch {
                    auto_download_favorites: auto_download,
                    default_translation: parse_resource_id(translation)?,
                    default_recitation: parse_resource_id(recitation)?,
                    default_commentary: parse_resource_id(commentary)?,
                    download_on_unmetered_only: unmetered_only,
                    storage_quota_mb: quota_mb,
                };
                set_preferences(&service, &patch).await
            }
            Commands::Config => show_config(),
        };

        service.close().await;
        result
    }
}

fn parse_resource_id(raw: Option<String>) -> Result<Option<ResourceId>> {
    raw.map(|id| ResourceId::new(id).context("Invalid resource ID"))
        .transpose()
}

/// Print a surah with its ayahs
async fn read_document(service: &StudyService, id: u32, translation: bool) -> Result<()> {
    let doc = service
        .get_document(id)
        .await
        .with_context(|| format!("Failed to read surah {}", id))?;

    println!("{}. {} ({})", doc.id, doc.name, doc.translated_name);
    println!(
        "{} ayahs · {} · source: {}",
        doc.unit_count, doc.classification, doc.provenance
    );
    println!("{}", "-".repeat(60));

    for unit in &doc.units {
        println!("[{}] {}", unit.number, unit.text);
        if translation {
            if let Some(ref text) = unit.translation {
                println!("     {}", text);
            }
        }
    }

    Ok(())
}

/// List every surah
async fn list_documents(service: &StudyService) -> Result<()> {
    let metas = service.get_all_documents().await;

    println!("{:<5} {:<20} {:<28} {:<7} {:<10}", "ID", "NAME", "TRANSLATED", "AYAHS", "SOURCE");
    println!("{}", "-".repeat(74));

    for meta in &metas {
        println!(
            "{:<5} {:<20} {:<28} {:<7} {:<10}",
            meta.id,
            meta.name,
            meta.translated_name,
            meta.unit_count,
            meta.provenance.to_string()
        );
    }

    println!("\nTotal: {} surahs", metas.len());
    Ok(())
}

/// List the resource catalog
async fn list_resources(service: &StudyService, resource_type: Option<ResourceType>) -> Result<()> {
    let resources = match resource_type {
        Some(resource_type) => service.get_resources_by_type(resource_type).await,
        None => service.get_resource_catalog().await,
    };

    if resources.is_empty() {
        println!("No resources found.");
        return Ok(());
    }

    println!(
        "{:<16} {:<12} {:<6} {:>10} {:<14} {}",
        "ID", "TYPE", "LANG", "SIZE", "STATUS", "NAME"
    );
    println!("{}", "-".repeat(80));

    for d in &resources {
        println!(
            "{:<16} {:<12} {:<6} {:>10} {:<14} {}",
            d.id.as_str(),
            d.resource_type.to_string(),
            d.language,
            d.size_bytes.map(format_bytes).unwrap_or_else(|| "-".to_string()),
            d.status.to_string(),
            d.name
        );
    }

    Ok(())
}

/// Queue a download and follow its events until it settles
async fn download(service: &StudyService, resource_id: &str) -> Result<()> {
    let mut events = service.subscribe_downloads();

    let queued = service
        .request_download(resource_id)
        .await
        .with_context(|| format!("Failed to queue {}", resource_id))?;

    if !queued && service.is_resource_available(resource_id).await? {
        println!("{} is already available", resource_id);
        return Ok(());
    }

    println!("Downloading {} via {}...", resource_id, service.fetcher_name());

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => bail!("Download worker stopped"),
        };

        match event {
            DownloadEvent::Paused { reason, queued } => {
                println!("Paused ({}), {} download(s) waiting", reason, queued);
                return Ok(());
            }
            event if event.resource_id().map(|id| id.as_str()) != Some(resource_id) => {}
            DownloadEvent::Progress { percent, downloaded, .. } => {
                println!("  {:>3}%  {}", percent, format_bytes(downloaded));
            }
            DownloadEvent::Completed { bytes, .. } => {
                println!("✓ {} downloaded ({})", resource_id, format_bytes(bytes));
                return Ok(());
            }
            DownloadEvent::Failed { error, .. } => {
                bail!("Download of {} failed: {}", resource_id, error);
            }
            DownloadEvent::Cancelled { .. } => {
                println!("Download of {} cancelled", resource_id);
                return Ok(());
            }
            _ => {}
        }
    }
}

async fn delete(service: &StudyService, resource_id: &str) -> Result<()> {
    service
        .delete_resource(resource_id)
        .await
        .with_context(|| format!("Failed to delete {}", resource_id))?;

    println!("✓ Deleted {}", resource_id);
    Ok(())
}

async fn show_storage(service: &StudyService) -> Result<()> {
    let usage = service.storage_usage().await?;
    let quota = service.get_preferences().quota_bytes();

    println!("Documents: {:>10}  ({} cached)", format_bytes(usage.documents_bytes), usage.document_count);
    println!("Resources: {:>10}  ({} downloaded)", format_bytes(usage.resources_bytes), usage.resource_count);
    println!("Total:     {:>10}", format_bytes(usage.total()));

    match (quota, usage.percent_of(quota)) {
        (Some(quota), Some(percent)) => {
            println!("Quota:     {:>10}  ({:.1}% used)", format_bytes(quota), percent)
        }
        _ => println!("Quota:     unlimited"),
    }

    Ok(())
}

async fn clear(service: &StudyService, yes: bool) -> Result<()> {
    if !yes {
        bail!("Refusing to delete local data without --yes");
    }

    if !service.clear_all_data().await {
        bail!("Failed to clear local data");
    }

    println!("✓ Local data cleared");
    Ok(())
}

fn show_preferences(service: &StudyService) -> Result<()> {
    let prefs = service.get_preferences();
    let yaml = serde_yaml::to_string(&prefs).context("Failed to render preferences")?;
    print!("{}", yaml);
    Ok(())
}

async fn set_preferences(service: &StudyService, patch: &PreferencesPatch) -> Result<()> {
    if patch.is_empty() {
        bail!("Nothing to change; pass at least one option");
    }

    service
        .set_preferences(patch)
        .await
        .context("Failed to save preferences")?;

    println!("✓ Preferences updated");
    show_preferences(service)
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("Config file: {}", cfg.config_file.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "(none - using defaults)".to_string()));
    println!();
    println!("Paths:");
    println!("  Home:  {}", cfg.home.display());
    println!("  Store: {}", cfg.store_dir().display());
    println!("  Lock:  {}", cfg.lock_path().display());
    println!();
    println!("Network:");
    match &cfg.endpoints {
        Some(endpoints) => {
            println!("  Documents:     {}", endpoints.document_url);
            println!("  Document list: {}", endpoints.document_list_url);
            println!("  Resources:     {}", endpoints.resource_url);
        }
        None => println!("  (offline - bundled content only)"),
    }
    println!("  Connectivity:  {}", cfg.connectivity);
    println!("  Timeout:       {}s", cfg.settings.resolver.network_timeout.as_secs());
    println!();
    println!("Cache:");
    println!("  Freshness:      {} days", cfg.settings.resolver.freshness.num_days());
    println!("  Refresh retries: {}", cfg.settings.resolver.refresh_retry.max_attempts);
    println!();
    println!("Downloads:");
    println!("  Timeout: {}s", cfg.settings.downloads.timeout.as_secs());

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(761_266_176), "726.0 MB");
    }

    #[test]
    fn test_parse_prefs_set() {
        let cli = Cli::try_parse_from([
            "mushaf", "prefs", "set", "--quota-mb", "0", "--translation", "en.pickthall",
        ])
        .unwrap();

        match cli.command {
            Commands::Prefs(PrefsCommands::Set { quota_mb, translation, auto_download, .. }) => {
                assert_eq!(quota_mb, Some(0));
                assert_eq!(translation.as_deref(), Some("en.pickthall"));
                assert_eq!(auto_download, None);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_resource_type_filter() {
        let cli = Cli::try_parse_from(["mushaf", "resources", "--type", "tafsir"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Resources { resource_type: Some(ResourceType::Commentary) }
        ));
    }
}

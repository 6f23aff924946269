//! Command-line configuration for the reconciliation tool.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PAYLOAD_RECONCILE_TENANT` | default | Tenant to reconcile |
//! | `PAYLOAD_RECONCILE_DATASTORES` | all configured | Comma-separated datastores |
//! | `PAYLOAD_RECONCILE_CONFIG` | (required) | Datastore settings file (JSON) |
//! | `PAYLOAD_RECONCILE_DRY_RUN` | false | Report orphans without deleting |
//! | `PAYLOAD_RECONCILE_WORKERS` | 1 | Concurrent scan loops per datastore |
//! | `PAYLOAD_RECONCILE_CONCURRENCY` | 16 | In-flight record checks per scan loop |
//! | `PAYLOAD_RECONCILE_MIN_AGE` | none | Grace period, e.g. `10m` |
//! | `PAYLOAD_RECONCILE_PAGE_SIZE` | store setting | Scan page size |
//! | `PAYLOAD_RECONCILE_LOG_LEVEL` | info | Log level |
//!
//! # Settings file
//!
//! The file maps tenant to datastore to the datastore's settings:
//!
//! ```json
//! {
//!   "acme": {
//!     "default": {
//!       "payload": { "backend": { "type": "memory" } },
//!       "system_of_record": { "type": "sqlite", "path": "acme.db" }
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use helios_payload::DatastoreKey;
use helios_payload::config::{DatastoreSettings, ReconcileOptions, SystemOfRecordSettings};
use helios_payload::core::ScanCursor;

/// Settings of every datastore, by tenant then datastore id.
pub type SettingsFile = BTreeMap<String, BTreeMap<String, DatastoreSettings>>;

/// Arguments of one reconciliation invocation.
#[derive(Debug, Clone, Parser)]
#[command(name = "payload-reconcile")]
#[command(about = "Finds and removes offloaded payloads that have no metadata row")]
pub struct ReconcileConfig {
    /// Tenant to reconcile.
    #[arg(long, env = "PAYLOAD_RECONCILE_TENANT", default_value = "default")]
    pub tenant: String,

    /// Datastore to reconcile (repeatable). Every datastore of the tenant when omitted.
    #[arg(
        long = "datastore",
        env = "PAYLOAD_RECONCILE_DATASTORES",
        value_delimiter = ','
    )]
    pub datastores: Vec<String>,

    /// Datastore settings file (JSON).
    #[arg(long, env = "PAYLOAD_RECONCILE_CONFIG")]
    pub config: PathBuf,

    /// Report orphans without deleting them.
    #[arg(long, env = "PAYLOAD_RECONCILE_DRY_RUN")]
    pub dry_run: bool,

    /// Concurrent scan loops per datastore, each over a disjoint slice of
    /// the keyspace.
    #[arg(long, env = "PAYLOAD_RECONCILE_WORKERS", default_value = "1")]
    pub workers: usize,

    /// Maximum in-flight record checks per scan loop.
    #[arg(long, env = "PAYLOAD_RECONCILE_CONCURRENCY", default_value = "16")]
    pub concurrency: usize,

    /// Skip payloads younger than this (e.g. `10m`, `1h 30m`).
    #[arg(long, env = "PAYLOAD_RECONCILE_MIN_AGE", value_parser = humantime::parse_duration)]
    pub min_age: Option<Duration>,

    /// Scan page size; the store's configured page size when unset.
    #[arg(long, env = "PAYLOAD_RECONCILE_PAGE_SIZE")]
    pub page_size: Option<usize>,

    /// Hex cursor to resume a single-datastore run from, as printed by a
    /// stopped run.
    #[arg(long, env = "PAYLOAD_RECONCILE_RESUME_FROM")]
    pub resume_from: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "PAYLOAD_RECONCILE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl ReconcileConfig {
    /// Validates the arguments and returns errors if any.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.workers == 0 {
            errors.push("Workers must be at least 1".to_string());
        }

        if self.concurrency == 0 {
            errors.push("Concurrency must be at least 1".to_string());
        }

        if self.page_size == Some(0) {
            errors.push("Page size cannot be 0".to_string());
        }

        if let Some(resume_from) = &self.resume_from {
            if ScanCursor::from_hex(resume_from).is_none() {
                errors.push(format!("Resume cursor '{}' is not valid hex", resume_from));
            }
            if self.workers > 1 {
                errors.push("--resume-from cannot be combined with --workers > 1".to_string());
            }
            if self.datastores.len() != 1 {
                errors.push("--resume-from requires exactly one --datastore".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Returns the options every engine of this invocation runs with.
    pub fn options(&self) -> ReconcileOptions {
        ReconcileOptions {
            dry_run: self.dry_run,
            concurrency: self.concurrency,
            page_size: self.page_size,
            min_age: self.min_age,
        }
    }

    /// Returns the cursor to resume from, if one was given.
    pub fn resume_cursor(&self) -> Option<ScanCursor> {
        self.resume_from.as_deref().and_then(ScanCursor::from_hex)
    }

    /// Loads the settings file and selects the datastores to reconcile.
    pub fn load_datastores(&self) -> anyhow::Result<Vec<(DatastoreKey, DatastoreSettings)>> {
        let file = load_settings(&self.config)?;
        select_datastores(file, &self.tenant, &self.datastores, self.dry_run)
    }
}

/// Reads and parses a settings file.
pub fn load_settings(path: &Path) -> anyhow::Result<SettingsFile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse settings file {}", path.display()))
}

/// Picks `tenant`'s datastores from `file`; all of them if `selected` is empty.
///
/// An in-memory system of record is empty, so every payload checked against
/// it is an orphan. It is only accepted for dry runs.
pub fn select_datastores(
    mut file: SettingsFile,
    tenant: &str,
    selected: &[String],
    dry_run: bool,
) -> anyhow::Result<Vec<(DatastoreKey, DatastoreSettings)>> {
    let Some(mut datastores) = file.remove(tenant) else {
        bail!("Tenant '{}' is not configured", tenant);
    };

    let mut chosen = Vec::new();
    if selected.is_empty() {
        for (datastore, settings) in datastores {
            chosen.push((DatastoreKey::new(tenant, datastore), settings));
        }
    } else {
        for datastore in selected {
            let Some(settings) = datastores.remove(datastore) else {
                bail!(
                    "Datastore '{}' is not configured for tenant '{}'",
                    datastore,
                    tenant
                );
            };
            chosen.push((DatastoreKey::new(tenant, datastore.as_str()), settings));
        }
    }

    for (key, settings) in &chosen {
        settings
            .payload
            .validate()
            .with_context(|| format!("Invalid payload settings for {}", key))?;
        if settings.system_of_record == SystemOfRecordSettings::Memory && !dry_run {
            bail!(
                "Datastore '{}' uses the in-memory system of record, which is only allowed with --dry-run",
                key
            );
        }
    }
    Ok(chosen)
}

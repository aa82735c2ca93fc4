//! Settings storage
//!
//! Orchestrator settings persisted as `config.json` in the data directory.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::discovery::local::CacheRoot;
use crate::storage::instances::INSTANCES_FILE;
use crate::storage::{get_data_dir, write_atomic, StorageError};
use crate::types::Backend;

/// File name of the settings inside the data directory
pub const SETTINGS_FILE: &str = "config.json";

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Overrides where the instance store lives
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Seconds between two health ticks
    pub health_interval_secs: u64,
    /// Timeout of a single health probe, in milliseconds
    pub probe_timeout_ms: u64,
    /// Base URL of the model hub
    pub hub_url: String,
    /// Maximum number of hub search results
    pub hub_result_limit: u32,
    /// Timeout of one hub search, in seconds
    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,
    /// Cache directories to scan instead of the well-known ones
    #[serde(default)]
    pub cache_roots: Option<Vec<CacheRoot>>,
    /// Executable overrides per backend
    #[serde(default)]
    pub executables: BTreeMap<Backend, String>,
    /// Soft cap of the shared log buffer
    pub log_capacity: usize,
    /// Entries dropped when the log buffer overflows
    pub log_trim: usize,
    /// Default tracing filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_search_timeout() -> u64 {
    15
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            data_dir: None,
            health_interval_secs: 10,
            probe_timeout_ms: 2000,
            hub_url: "https://huggingface.co".to_string(),
            hub_result_limit: 20,
            search_timeout_secs: default_search_timeout(),
            cache_roots: None,
            executables: BTreeMap::new(),
            log_capacity: 500,
            log_trim: 100,
            log_level: default_log_level(),
        }
    }
}

impl OrchestratorSettings {
    /// Settings rooted at `dir`, for embedding and tests
    pub fn with_data_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// Clamp every value into a usable range
    pub fn validate(&mut self) {
        self.health_interval_secs = self.health_interval_secs.clamp(1, 3600);
        self.probe_timeout_ms = self.probe_timeout_ms.clamp(100, 60_000);
        self.hub_result_limit = self.hub_result_limit.clamp(1, 100);
        self.search_timeout_secs = self.search_timeout_secs.clamp(1, 120);

        if self.hub_url.trim().is_empty() {
            self.hub_url = "https://huggingface.co".to_string();
        }
        while self.hub_url.ends_with('/') {
            self.hub_url.pop();
        }

        self.log_capacity = self.log_capacity.clamp(10, 100_000);
        if self.log_trim == 0 || self.log_trim > self.log_capacity {
            self.log_trim = (self.log_capacity / 5).max(1);
        }

        if self.log_level.trim().is_empty() {
            self.log_level = default_log_level();
        }

        self.executables.retain(|backend, exe| {
            let keep = !exe.trim().is_empty();
            if !keep {
                tracing::warn!("Ignoring empty executable override for {}", backend);
            }
            keep
        });
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    /// Data directory in effect
    pub fn resolve_data_dir(&self) -> Result<PathBuf, StorageError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => get_data_dir(),
        }
    }

    /// Path of the instance store
    pub fn instances_path(&self) -> Result<PathBuf, StorageError> {
        Ok(self.resolve_data_dir()?.join(INSTANCES_FILE))
    }
}

/// Get the settings file path
fn get_settings_path() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join(SETTINGS_FILE))
}

/// Load settings from disk
///
/// Returns default settings if the file doesn't exist or is corrupted
pub fn load_settings() -> OrchestratorSettings {
    match load_settings_internal() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            OrchestratorSettings::default()
        }
    }
}

fn load_settings_internal() -> Result<OrchestratorSettings, StorageError> {
    let path = get_settings_path()?;

    if !path.exists() {
        tracing::info!("Settings file not found, using defaults");
        return Ok(OrchestratorSettings::default());
    }

    let json = fs::read_to_string(&path)?;
    let mut settings: OrchestratorSettings = serde_json::from_str(&json)?;
    settings.validate();

    tracing::debug!("Loaded settings from disk");
    Ok(settings)
}

/// Save settings to disk
pub fn save_settings(settings: &OrchestratorSettings) -> Result<(), StorageError> {
    let path = get_settings_path()?;
    let json = serde_json::to_string_pretty(settings)?;
    write_atomic(&path, json.as_bytes())?;

    tracing::debug!("Saved settings to disk");
    Ok(())
}

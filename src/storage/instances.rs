//! Instance store
//!
//! Durable id -> InstanceConfig map persisted as one JSON document.
//!
//! Format history:
//! - version 1: a bare JSON object mapping id to config fields.
//! - version 2: `{ "version": 2, "instances": {...}, "retired": [...] }`.
//!
//! Loading never fails: a missing, unreadable or corrupt file is replaced by
//! the two bootstrap instances (a model router and a code assistant).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::storage::{write_atomic, StorageError};
use crate::types::role::{default_config_for, DEFAULT_HOST, DEFAULT_MAX_CONTEXT};
use crate::types::{Backend, InstanceConfig, InstanceId, Role};

/// Current on-disk format version
pub const STORE_VERSION: u32 = 2;

/// File name of the store inside the data directory
pub const INSTANCES_FILE: &str = "instances.json";

/// Instance store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Instance {0} already exists")]
    Duplicate(InstanceId),
    #[error("Instance id {0} was removed and cannot be reused")]
    Retired(InstanceId),
    #[error("Unknown instance {0}")]
    Unknown(InstanceId),
    #[error("Invalid instance {id}: {reason}")]
    Invalid { id: InstanceId, reason: String },
    #[error("Unsupported store version {0}")]
    UnsupportedVersion(u64),
}

/// Config fields as persisted; the id is the map key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedInstance {
    role: Role,
    backend: Backend,
    model: String,
    port: u16,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    auto_start: bool,
    #[serde(default = "default_max_context")]
    max_context_length: u32,
    #[serde(default)]
    quantization: Option<String>,
    #[serde(default)]
    custom_args: Option<Vec<String>>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_context() -> u32 {
    DEFAULT_MAX_CONTEXT
}

impl PersistedInstance {
    fn into_config(self, id: InstanceId) -> InstanceConfig {
        InstanceConfig {
            id,
            role: self.role,
            backend: self.backend,
            model: self.model,
            host: self.host,
            port: self.port,
            enabled: self.enabled,
            auto_start: self.auto_start,
            max_context_length: self.max_context_length,
            quantization: self.quantization,
            custom_args: self.custom_args,
        }
    }
}

impl From<&InstanceConfig> for PersistedInstance {
    fn from(config: &InstanceConfig) -> Self {
        Self {
            role: config.role,
            backend: config.backend,
            model: config.model.clone(),
            port: config.port,
            host: config.host.clone(),
            enabled: config.enabled,
            auto_start: config.auto_start,
            max_context_length: config.max_context_length,
            quantization: config.quantization.clone(),
            custom_args: config.custom_args.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    instances: BTreeMap<InstanceId, PersistedInstance>,
    #[serde(default)]
    retired: BTreeSet<InstanceId>,
}

/// Parse any known format into the current one.
///
/// Returns the document and whether it had to be migrated.
fn parse_store(json: &str) -> Result<(StoreFile, bool), StoreError> {
    let value: Value = serde_json::from_str(json).map_err(StorageError::from)?;

    match value.get("version").and_then(Value::as_u64) {
        Some(v) if v == STORE_VERSION as u64 => {
            let file: StoreFile = serde_json::from_value(value).map_err(StorageError::from)?;
            Ok((file, false))
        }
        Some(v) => Err(StoreError::UnsupportedVersion(v)),
        None => {
            let instances: BTreeMap<InstanceId, PersistedInstance> =
                serde_json::from_value(value).map_err(StorageError::from)?;
            Ok((
                StoreFile {
                    version: STORE_VERSION,
                    instances,
                    retired: BTreeSet::new(),
                },
                true,
            ))
        }
    }
}

/// Durable map of instance configurations
#[derive(Debug)]
pub struct InstanceStore {
    path: PathBuf,
    instances: BTreeMap<InstanceId, InstanceConfig>,
    retired: BTreeSet<InstanceId>,
}

impl InstanceStore {
    /// Load the store at `path`, falling back to the bootstrap instances
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::load_internal(&path) {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!(
                    "Failed to load instances from {}, using defaults: {}",
                    path.display(),
                    e
                );
                let store = Self::bootstrap(path);
                if let Err(e) = store.save() {
                    tracing::warn!("Failed to persist default instances: {}", e);
                }
                store
            }
        }
    }

    fn load_internal(path: &Path) -> Result<Self, StoreError> {
        let json = fs::read_to_string(path).map_err(StorageError::from)?;
        let (file, migrated) = parse_store(&json)?;

        let mut instances = BTreeMap::new();
        for (id, persisted) in file.instances {
            let config = persisted.into_config(id);
            if let Some(reason) = config.validation_error() {
                tracing::warn!("Dropping invalid instance {}: {}", id, reason);
                continue;
            }
            instances.insert(id, config);
        }

        let store = Self {
            path: path.to_path_buf(),
            instances,
            retired: file.retired,
        };

        if migrated {
            tracing::info!("Migrated instance store to version {}", STORE_VERSION);
            store.save()?;
        }

        tracing::debug!("Loaded {} instance(s) from disk", store.instances.len());
        Ok(store)
    }

    /// Store holding only the two default instances
    fn bootstrap(path: PathBuf) -> Self {
        let instances = [Role::ModelRouter, Role::CodeAssistant]
            .into_iter()
            .map(default_config_for)
            .map(|config| (config.id, config))
            .collect();
        Self {
            path,
            instances,
            retired: BTreeSet::new(),
        }
    }

    /// Write every instance to disk
    pub fn save(&self) -> Result<(), StorageError> {
        let file = StoreFile {
            version: STORE_VERSION,
            instances: self
                .instances
                .iter()
                .map(|(id, config)| (*id, PersistedInstance::from(config)))
                .collect(),
            retired: self.retired.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        write_atomic(&self.path, json.as_bytes())?;
        tracing::debug!("Saved {} instance(s) to disk", self.instances.len());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add(&mut self, config: InstanceConfig) -> Result<(), StoreError> {
        if self.instances.contains_key(&config.id) {
            return Err(StoreError::Duplicate(config.id));
        }
        if self.retired.contains(&config.id) {
            return Err(StoreError::Retired(config.id));
        }
        if let Some(reason) = config.validation_error() {
            return Err(StoreError::Invalid {
                id: config.id,
                reason,
            });
        }
        self.instances.insert(config.id, config);
        self.save()?;
        Ok(())
    }

    /// Remove and retire `id`. Unknown ids are a no-op.
    pub fn remove(&mut self, id: &InstanceId) -> Result<Option<InstanceConfig>, StoreError> {
        let removed = self.instances.remove(id);
        if removed.is_some() {
            self.retired.insert(*id);
            self.save()?;
        }
        Ok(removed)
    }

    pub fn update(&mut self, config: InstanceConfig) -> Result<(), StoreError> {
        if !self.instances.contains_key(&config.id) {
            return Err(StoreError::Unknown(config.id));
        }
        if let Some(reason) = config.validation_error() {
            return Err(StoreError::Invalid {
                id: config.id,
                reason,
            });
        }
        self.instances.insert(config.id, config);
        self.save()?;
        Ok(())
    }

    pub fn get(&self, id: &InstanceId) -> Option<&InstanceConfig> {
        self.instances.get(id)
    }

    pub fn contains(&self, id: &InstanceId) -> bool {
        self.instances.contains_key(id)
    }

    /// All configs in store order
    pub fn all(&self) -> impl Iterator<Item = &InstanceConfig> {
        self.instances.values()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// First enabled config serving `role`
    pub fn get_by_role(&self, role: Role) -> Option<&InstanceConfig> {
        self.instances
            .values()
            .find(|config| config.enabled && config.role == role)
    }

    pub fn is_retired(&self, id: &InstanceId) -> bool {
        self.retired.contains(id)
    }
}

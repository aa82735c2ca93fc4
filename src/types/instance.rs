//! Instance types
//!
//! Persisted instance configuration and the derived runtime status.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::types::backend::Backend;
use crate::types::role::{default_config_for, Role};

/// Opaque, stable instance identifier. Never reused after deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for InstanceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Configuration of one (role, backend, model) instance bound to host:port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConfig {
    pub id: InstanceId,
    pub role: Role,
    pub backend: Backend,
    /// Model reference; its meaning depends on the backend
    pub model: String,
    pub host: String,
    pub port: u16,
    pub enabled: bool,
    pub auto_start: bool,
    pub max_context_length: u32,
    pub quantization: Option<String>,
    /// Extra launch arguments appended verbatim
    pub custom_args: Option<Vec<String>>,
}

impl InstanceConfig {
    /// Role defaults with a specific backend and model
    pub fn new(role: Role, backend: Backend, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
            ..default_config_for(role)
        }
    }

    /// Describe the first problem that makes this config unusable
    pub fn validation_error(&self) -> Option<String> {
        if self.model.trim().is_empty() {
            return Some("model must not be empty".to_string());
        }
        if self.host.trim().is_empty() {
            return Some("host must not be empty".to_string());
        }
        if self.port == 0 {
            return Some("port must be non-zero".to_string());
        }
        None
    }
}

/// Runtime status, derived from health probes. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    pub id: InstanceId,
    pub role: Role,
    pub backend: Backend,
    /// Outcome of the most recent health probe
    pub running: bool,
    pub model: String,
    pub port: u16,
    pub uptime_secs: Option<u64>,
    pub request_count: Option<u64>,
    pub avg_latency_ms: Option<f64>,
    pub error: Option<String>,
}

impl InstanceStatus {
    /// Status written when an instance is stopped
    pub fn stopped(config: &InstanceConfig) -> Self {
        Self {
            id: config.id,
            role: config.role,
            backend: config.backend,
            running: false,
            model: config.model.clone(),
            port: config.port,
            uptime_secs: None,
            request_count: None,
            avg_latency_ms: None,
            error: None,
        }
    }
}

/// Lifecycle state of one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Unconfigured,
    Stopped,
    /// Process launched, no healthy probe yet
    Launching,
    Healthy,
}

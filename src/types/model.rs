//! Model types
//!
//! Defines model metadata produced by discovery.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::types::backend::Backend;
use crate::types::role::Role;

/// A model found in a local cache or on the remote hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredModel {
    /// `org/name` for hub models, `name:tag` for ollama
    pub id: String,
    pub display_name: String,
    pub author: Option<String>,
    pub downloads: Option<u64>,
    /// Bytes on disk, when installed
    pub size_bytes: Option<u64>,
    pub quantization: Option<String>,
    pub backend: Backend,
    pub installed: bool,
    pub install_path: Option<PathBuf>,
    /// Roles this model suits; never empty
    pub recommended_roles: BTreeSet<Role>,
}

//! Model discovery
//!
//! Finds models installed in local caches and searches the remote hub.
//! Either source failing degrades to an empty contribution.

pub mod hub;
pub mod local;
pub mod roles;

use std::collections::HashSet;
use thiserror::Error;

use crate::storage::settings::OrchestratorSettings;
use crate::system::platform::Platform;
use crate::types::{Backend, DiscoveredModel};

pub use hub::HubClient;
pub use local::{CacheKind, CacheRoot};
pub use roles::{infer_roles, RoleRule, ROLE_RULES};

/// Discovery errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Hub returned HTTP {0}")]
    Status(u16),
    #[error("Failed to decode hub response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Local scan plus hub search
#[derive(Debug, Clone)]
pub struct ModelDiscovery {
    hub: HubClient,
    roots: Vec<CacheRoot>,
    platform: Platform,
}

impl ModelDiscovery {
    pub fn new(hub: HubClient, roots: Vec<CacheRoot>, platform: Platform) -> Self {
        Self {
            hub,
            roots,
            platform,
        }
    }

    /// Configured cache roots, or the well-known ones
    pub fn from_settings(settings: &OrchestratorSettings, platform: Platform) -> Self {
        let hub = HubClient::new(
            settings.hub_url.clone(),
            settings.hub_result_limit,
            settings.search_timeout(),
        );
        let roots = settings
            .cache_roots
            .clone()
            .unwrap_or_else(local::well_known_roots);
        Self::new(hub, roots, platform)
    }

    /// Scan the local caches off the async executor
    pub async fn discover_installed(&self) -> Vec<DiscoveredModel> {
        let roots = self.roots.clone();
        let platform = self.platform;

        match tokio::task::spawn_blocking(move || local::scan_roots(&roots, &platform)).await {
            Ok(models) => {
                let total: u64 = models.iter().filter_map(|m| m.size_bytes).sum();
                tracing::info!(
                    "Found {} installed models ({})",
                    models.len(),
                    format_size(total)
                );
                models
            }
            Err(e) => {
                tracing::warn!("Local model scan failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Hub search; failures are logged and yield nothing
    pub async fn search(
        &self,
        query: &str,
        backend: Backend,
        installed: &[DiscoveredModel],
    ) -> Vec<DiscoveredModel> {
        match self.hub.search(query, backend, installed).await {
            Ok(models) => models,
            Err(e) => {
                tracing::warn!("Hub search for {:?} failed: {}", query, e);
                Vec::new()
            }
        }
    }

    /// Installed models followed by hub results not already installed
    pub async fn discover(&self, query: Option<&str>, backend: Backend) -> Vec<DiscoveredModel> {
        let mut models = self.discover_installed().await;
        if let Some(query) = query {
            let remote = self.search(query, backend, &models).await;
            let known: HashSet<String> = models.iter().map(|m| m.id.clone()).collect();
            models.extend(remote.into_iter().filter(|m| !known.contains(&m.id)));
        }
        models
    }
}

/// Get a human-readable size string
pub fn format_size(bytes: u64) -> String {
    let bytes = bytes as f64;
    if bytes < 1024.0 {
        format!("{} B", bytes as u64)
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.2} KB", bytes / 1024.0)
    } else if bytes < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB", bytes / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes / (1024.0 * 1024.0 * 1024.0))
    }
}

//! Remote model hub search

use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;

use crate::discovery::local::{infer_quantization, split_id};
use crate::discovery::roles::infer_roles;
use crate::discovery::DiscoveryError;
use crate::types::{Backend, DiscoveredModel};

/// Queries shorter than this (after trimming) never hit the network
pub const MIN_QUERY_LEN: usize = 3;

const USER_AGENT: &str = concat!("local-orchestrator/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HubModel {
    id: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    downloads: Option<u64>,
}

/// Client for the hub's model listing API
#[derive(Debug, Clone)]
pub struct HubClient {
    client: reqwest::Client,
    base_url: String,
    limit: u32,
    timeout: Duration,
}

impl HubClient {
    pub fn new(base_url: impl Into<String>, limit: u32, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if is_loopback(&base_url) {
            builder = builder.no_proxy();
        }
        let client = builder.build().unwrap_or_else(|e| {
            tracing::warn!("Failed to build hub client, using defaults: {}", e);
            reqwest::Client::new()
        });

        Self {
            client,
            base_url,
            limit,
            timeout,
        }
    }

    /// Search the hub for models usable with `backend`.
    ///
    /// `installed` is the last local scan; matching results are marked installed.
    pub async fn search(
        &self,
        query: &str,
        backend: Backend,
        installed: &[DiscoveredModel],
    ) -> Result<Vec<DiscoveredModel>, DiscoveryError> {
        let query = query.trim();
        if query.chars().count() < MIN_QUERY_LEN {
            return Ok(Vec::new());
        }

        let search = match backend.community_namespace() {
            Some(namespace) => format!("{}/{}", namespace, query),
            None => query.to_string(),
        };
        let url = format!("{}/api/models", self.base_url);
        let limit = self.limit.to_string();

        tracing::debug!("Searching hub for {:?}", search);
        let response = self
            .client
            .get(&url)
            .query(&[("search", search.as_str()), ("limit", limit.as_str())])
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DiscoveryError::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        let found: Vec<HubModel> = serde_json::from_str(&body)?;

        Ok(found
            .into_iter()
            .map(|m| to_discovered(m, backend, installed))
            .collect())
    }
}

fn to_discovered(model: HubModel, backend: Backend, installed: &[DiscoveredModel]) -> DiscoveredModel {
    let (author_from_id, display_name) = split_id(&model.id);
    let local = installed.iter().find(|m| m.id == model.id);

    DiscoveredModel {
        display_name,
        author: model.author.or(author_from_id),
        downloads: model.downloads,
        size_bytes: local.and_then(|m| m.size_bytes),
        quantization: infer_quantization(&model.id),
        backend,
        installed: local.is_some(),
        install_path: local.and_then(|m| m.install_path.clone()),
        recommended_roles: infer_roles(&model.id),
        id: model.id,
    }
}

fn is_loopback(url: &str) -> bool {
    let Ok(url) = reqwest::Url::parse(url) else {
        return false;
    };
    match url.host_str() {
        Some("localhost") => true,
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false),
        None => false,
    }
}

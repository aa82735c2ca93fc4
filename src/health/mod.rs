//! Health monitor
//!
//! A single timer fans out one independent `GET /health` probe per enabled
//! instance. Results are handed back to a [`HealthSink`] as each probe
//! completes, so a hung backend never delays the others.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::types::InstanceId;

/// One instance to probe in a tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub id: InstanceId,
    pub host: String,
    pub port: u16,
    /// Lifecycle epoch of the instance when the tick began
    pub epoch: u64,
}

/// Result of one probe
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub healthy: bool,
    /// Round trip time of the probe
    pub latency: Duration,
    pub request_count: Option<u64>,
    pub avg_latency_ms: Option<f64>,
    pub error: Option<String>,
}

/// Optional counters some servers put in their health body
#[derive(Debug, Default, Deserialize)]
struct HealthBody {
    request_count: Option<u64>,
    avg_latency_ms: Option<f64>,
}

/// Receives probe results
#[async_trait]
pub trait HealthSink: Send + Sync {
    /// Instances to probe now; `None` once the owner is gone
    async fn targets(&self) -> Option<Vec<ProbeTarget>>;

    async fn record(&self, target: ProbeTarget, outcome: ProbeOutcome);
}

// =============================================================================
// Probing
// =============================================================================

/// HTTP prober with a per-request timeout
#[derive(Debug, Clone)]
pub struct HealthChecker {
    client: reqwest::Client,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(timeout: Duration) -> Self {
        // Backends are local; never route probes through a proxy
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build health client, using defaults: {}", e);
                reqwest::Client::new()
            });
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe `http://{host}:{port}/health`. HTTP 200 is healthy whatever the body.
    pub async fn probe(&self, host: &str, port: u16) -> ProbeOutcome {
        let url = format!("http://{}:{}/health", host, port);
        let started = Instant::now();

        let result = self.client.get(&url).timeout(self.timeout).send().await;
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                return ProbeOutcome {
                    healthy: false,
                    latency: started.elapsed(),
                    request_count: None,
                    avg_latency_ms: None,
                    error: Some(self.describe(&e)),
                }
            }
        };

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return ProbeOutcome {
                healthy: false,
                latency: started.elapsed(),
                request_count: None,
                avg_latency_ms: None,
                error: Some(format!("HTTP {}", status.as_u16())),
            };
        }

        let body = response.text().await.unwrap_or_default();
        let latency = started.elapsed();
        let counters: HealthBody = serde_json::from_str(&body).unwrap_or_default();

        ProbeOutcome {
            healthy: true,
            latency,
            request_count: counters.request_count,
            avg_latency_ms: Some(
                counters
                    .avg_latency_ms
                    .unwrap_or(latency.as_secs_f64() * 1000.0),
            ),
            error: None,
        }
    }

    fn describe(&self, error: &reqwest::Error) -> String {
        if error.is_timeout() {
            format!("Health probe timed out after {}ms", self.timeout.as_millis())
        } else if error.is_connect() {
            format!("Connection failed: {}", error_chain(error))
        } else {
            error_chain(error)
        }
    }
}

/// `error` followed by each of its sources; reqwest keeps the OS reason there
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Run one tick: probe every target concurrently and record each result as
/// soon as it arrives. Returns `false` when the sink is gone.
pub async fn tick(checker: &HealthChecker, sink: Arc<dyn HealthSink>) -> bool {
    let Some(targets) = sink.targets().await else {
        return false;
    };

    let mut probes = JoinSet::new();
    for target in targets {
        let checker = checker.clone();
        let sink = sink.clone();
        probes.spawn(async move {
            let outcome = checker.probe(&target.host, target.port).await;
            tracing::debug!(
                "Probe {} -> healthy={} ({:?})",
                target.id,
                outcome.healthy,
                outcome.latency
            );
            sink.record(target, outcome).await;
        });
    }

    while let Some(joined) = probes.join_next().await {
        if let Err(e) = joined {
            tracing::warn!("Health probe task failed: {}", e);
        }
    }
    true
}

// =============================================================================
// Timer
// =============================================================================

/// Periodic driver of [`tick`]
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    checker: HealthChecker,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(checker: HealthChecker, interval: Duration) -> Self {
        Self { checker, interval }
    }

    /// Start the timer. The first tick fires one interval from now; the task
    /// ends on its own when the sink goes away.
    pub fn spawn(self, sink: Arc<dyn HealthSink>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.interval;
            let mut ticker = tokio::time::interval_at(start, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if !tick(&self.checker, sink.clone()).await {
                    tracing::debug!("Health monitor owner dropped, stopping");
                    break;
                }
            }
        })
    }
}

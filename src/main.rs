//! Local orchestrator daemon
//!
//! Starts the auto-start instances, reports status changes and shuts every
//! backend down on Ctrl-C.

use local_orchestrator::discovery::format_size;
use local_orchestrator::storage::settings::load_settings;
use local_orchestrator::{logger, Orchestrator, OrchestratorEvent};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() {
    let settings = load_settings();

    if let Err(e) = logger::init(&settings.log_level) {
        eprintln!("{}; falling back to info", e);
        let _ = logger::init("info");
    }

    let orchestrator = match Orchestrator::new(settings) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            tracing::error!("Failed to start orchestrator: {}", e);
            std::process::exit(1);
        }
    };

    let mut events = orchestrator.subscribe();
    let _ = orchestrator.discover_in_background();

    let (started, failed) = orchestrator.start_all().await;
    tracing::info!("{} instance(s) started, {} failed", started, failed);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(OrchestratorEvent::StatusChanged(status)) => {
                    tracing::info!(
                        "{} on port {}: {}{}",
                        status.role.display_name(),
                        status.port,
                        if status.running { "running" } else { "down" },
                        status.error.map(|e| format!(" ({})", e)).unwrap_or_default()
                    );
                }
                Ok(OrchestratorEvent::LaunchFailed { id, reason }) => {
                    tracing::warn!("Instance {} failed to launch: {}", id, reason);
                }
                Ok(OrchestratorEvent::DiscoveredModelsChanged(count)) => {
                    let models = orchestrator.discovered_models().await;
                    let total: u64 = models.iter().filter_map(|m| m.size_bytes).sum();
                    tracing::info!("{} installed model(s), {}", count, format_size(total));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Skipped {} event(s)", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    orchestrator.shutdown().await;
}

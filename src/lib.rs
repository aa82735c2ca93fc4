//! Local model orchestrator
//!
//! Assigns roles to local inference servers, launches and stops them,
//! probes their health and discovers installed or downloadable models.

pub mod discovery;
pub mod health;
pub mod logger;
pub mod logs;
pub mod orchestrator;
pub mod storage;
pub mod supervisor;
pub mod system;
pub mod types;

#[cfg(test)]
mod testing;

pub use logs::{LogAggregator, LogEntry};
pub use orchestrator::{Orchestrator, OrchestratorError, OrchestratorEvent};
pub use storage::settings::OrchestratorSettings;
pub use types::{
    default_config_for, Backend, DiscoveredModel, InstanceConfig, InstanceId, InstanceState,
    InstanceStatus, Role,
};

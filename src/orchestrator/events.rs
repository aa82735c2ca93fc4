//! Events published to orchestrator subscribers

use crate::types::{InstanceId, InstanceStatus};

/// Change notifications, delivered through `Orchestrator::subscribe`
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    /// An instance was added, updated or removed
    InstancesChanged,
    /// A status was written by a probe or a stop
    StatusChanged(InstanceStatus),
    /// The status of a removed instance was dropped
    StatusRemoved(InstanceId),
    /// The discovered model list was replaced; carries its new length
    DiscoveredModelsChanged(usize),
    /// A start attempt failed before the backend came up
    LaunchFailed { id: InstanceId, reason: String },
}

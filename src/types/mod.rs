//! Shared type definitions
//!
//! Roles, backends, instance configuration/status and discovered models.

pub mod backend;
pub mod instance;
pub mod model;
pub mod role;

pub use backend::Backend;
pub use instance::{InstanceConfig, InstanceId, InstanceState, InstanceStatus};
pub use model::DiscoveredModel;
pub use role::{default_config_for, Role};

//! Role types
//!
//! Defines the semantic roles a local model instance can serve and the
//! static registry of their defaults.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::backend::Backend;
use crate::types::instance::{InstanceConfig, InstanceId};

/// Host every default instance binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Quantization hint applied to default instances
pub const DEFAULT_QUANTIZATION: &str = "4bit";
/// Context window applied to default instances
pub const DEFAULT_MAX_CONTEXT: u32 = 32768;

/// Semantic purpose assigned to a model instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Picks which model handles an incoming request
    ModelRouter,
    /// Code completion and editing
    CodeAssistant,
    /// Condenses long inputs
    Summarizer,
    /// Labels a task before dispatch
    TaskClassifier,
    /// Produces embedding vectors
    Embedder,
    /// Long-form step by step reasoning
    Reasoner,
    /// Catch-all for user-defined purposes
    Custom,
}

const ALL_ROLES: [Role; 7] = [
    Role::ModelRouter,
    Role::CodeAssistant,
    Role::Summarizer,
    Role::TaskClassifier,
    Role::Embedder,
    Role::Reasoner,
    Role::Custom,
];

impl Role {
    /// Every role, in catalog order
    pub fn all() -> &'static [Role] {
        &ALL_ROLES
    }

    /// Stable snake_case identifier, as persisted
    pub fn id(&self) -> &'static str {
        match self {
            Role::ModelRouter => "model_router",
            Role::CodeAssistant => "code_assistant",
            Role::Summarizer => "summarizer",
            Role::TaskClassifier => "task_classifier",
            Role::Embedder => "embedder",
            Role::Reasoner => "reasoner",
            Role::Custom => "custom",
        }
    }

    pub fn from_id(id: &str) -> Option<Role> {
        ALL_ROLES.iter().copied().find(|r| r.id() == id)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Role::ModelRouter => "Model Router",
            Role::CodeAssistant => "Code Assistant",
            Role::Summarizer => "Summarizer",
            Role::TaskClassifier => "Task Classifier",
            Role::Embedder => "Embedder",
            Role::Reasoner => "Reasoner",
            Role::Custom => "Custom",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Role::ModelRouter => "Routes each request to the best suited local or remote model",
            Role::CodeAssistant => "Completes, explains and edits source code",
            Role::Summarizer => "Condenses documents and long conversations",
            Role::TaskClassifier => "Classifies incoming tasks before they are dispatched",
            Role::Embedder => "Produces embedding vectors for retrieval",
            Role::Reasoner => "Works through multi-step problems before answering",
            Role::Custom => "User-defined purpose",
        }
    }

    /// Recommended model identifiers, best first. Never empty.
    pub fn recommended_models(&self) -> &'static [&'static str] {
        match self {
            Role::ModelRouter => &[
                "mlx-community/Qwen2.5-1.5B-Instruct-4bit",
                "mlx-community/Llama-3.2-3B-Instruct-4bit",
            ],
            Role::CodeAssistant => &[
                "mlx-community/Qwen2.5-Coder-32B-Instruct-4bit",
                "mlx-community/Qwen2.5-Coder-7B-Instruct-4bit",
            ],
            Role::Summarizer => &[
                "mlx-community/Qwen2.5-7B-Instruct-4bit",
                "mlx-community/Mistral-7B-Instruct-v0.3-4bit",
            ],
            Role::TaskClassifier => &[
                "mlx-community/Qwen2.5-0.5B-Instruct-4bit",
                "mlx-community/Phi-3.5-mini-instruct-4bit",
            ],
            Role::Embedder => &[
                "nomic-ai/nomic-embed-text-v1.5",
                "BAAI/bge-m3",
            ],
            Role::Reasoner => &[
                "mlx-community/DeepSeek-R1-Distill-Qwen-14B-4bit",
                "mlx-community/QwQ-32B-4bit",
            ],
            Role::Custom => &["mlx-community/Llama-3.2-3B-Instruct-4bit"],
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Role::CodeAssistant => 8000,
            Role::ModelRouter => 8001,
            Role::Summarizer => 8002,
            Role::TaskClassifier => 8003,
            Role::Embedder => 8004,
            Role::Reasoner => 8005,
            Role::Custom => 8010,
        }
    }

    /// Whether instances of this role start with the orchestrator by default
    pub fn auto_starts(&self) -> bool {
        matches!(self, Role::ModelRouter | Role::CodeAssistant)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Default configuration for a role on the current platform.
///
/// Only the identifier differs between two calls for the same role.
pub fn default_config_for(role: Role) -> InstanceConfig {
    InstanceConfig {
        id: InstanceId::new(),
        role,
        backend: Backend::preferred(),
        model: role.recommended_models()[0].to_string(),
        host: DEFAULT_HOST.to_string(),
        port: role.default_port(),
        enabled: true,
        auto_start: role.auto_starts(),
        max_context_length: DEFAULT_MAX_CONTEXT,
        quantization: Some(DEFAULT_QUANTIZATION.to_string()),
        custom_args: None,
    }
}

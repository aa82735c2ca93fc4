//! Backend types
//!
//! Catalog of the local inference engines the orchestrator knows how to launch.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::system::platform::Platform;

/// A local inference engine implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Backend {
    /// Metal-accelerated runtime (Apple Silicon)
    #[serde(rename = "mlx")]
    Mlx,
    /// CUDA-oriented OpenAI compatible server
    #[serde(rename = "vllm")]
    Vllm,
    /// Generic local server, runs anywhere
    #[serde(rename = "llama_cpp")]
    LlamaCpp,
    /// One global server shared by every instance
    #[serde(rename = "ollama")]
    Ollama,
    /// Reserved, not launchable yet
    #[serde(rename = "exllama")]
    Exllama,
    /// Reserved, not launchable yet
    #[serde(rename = "tensorrt")]
    TensorRt,
}

const ALL_BACKENDS: [Backend; 6] = [
    Backend::Mlx,
    Backend::Vllm,
    Backend::LlamaCpp,
    Backend::Ollama,
    Backend::Exllama,
    Backend::TensorRt,
];

impl Backend {
    pub fn all() -> &'static [Backend] {
        &ALL_BACKENDS
    }

    pub fn id(&self) -> &'static str {
        match self {
            Backend::Mlx => "mlx",
            Backend::Vllm => "vllm",
            Backend::LlamaCpp => "llama_cpp",
            Backend::Ollama => "ollama",
            Backend::Exllama => "exllama",
            Backend::TensorRt => "tensorrt",
        }
    }

    pub fn from_id(id: &str) -> Option<Backend> {
        ALL_BACKENDS.iter().copied().find(|b| b.id() == id)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Backend::Mlx => "MLX (Metal)",
            Backend::Vllm => "vLLM (CUDA)",
            Backend::LlamaCpp => "llama.cpp server",
            Backend::Ollama => "Ollama",
            Backend::Exllama => "ExLlama",
            Backend::TensorRt => "TensorRT-LLM",
        }
    }

    /// Backend used for defaults on the running machine
    pub fn preferred() -> Backend {
        Self::preferred_on(Platform::current())
    }

    pub fn preferred_on(platform: &Platform) -> Backend {
        if platform.apple_silicon {
            Backend::Mlx
        } else {
            Backend::LlamaCpp
        }
    }

    pub fn is_available(&self) -> bool {
        self.unavailable_reason(Platform::current()).is_none()
    }

    /// Why this backend cannot run on `platform`, or `None` if it can
    pub fn unavailable_reason(&self, platform: &Platform) -> Option<&'static str> {
        match self {
            Backend::Mlx if !platform.apple_silicon => Some("MLX requires Apple Silicon"),
            Backend::Vllm if !platform.cuda => Some("vLLM requires an NVIDIA CUDA driver"),
            Backend::Exllama | Backend::TensorRt => Some("backend is not implemented yet"),
            _ => None,
        }
    }

    pub fn supports_embeddings(&self) -> bool {
        matches!(self, Backend::LlamaCpp | Backend::Ollama | Backend::Vllm)
    }

    /// Executable launched when no override is configured
    pub fn default_executable(&self) -> Option<&'static str> {
        match self {
            Backend::Mlx => Some("mlx_lm.server"),
            Backend::Vllm => Some("python3"),
            Backend::LlamaCpp => Some("llama-server"),
            Backend::Ollama => Some("ollama"),
            Backend::Exllama | Backend::TensorRt => None,
        }
    }

    /// Arguments placed between the executable and the model arguments
    pub fn launch_prefix(&self) -> &'static [&'static str] {
        match self {
            Backend::Vllm => &["-m", "vllm.entrypoints.openai.api_server"],
            Backend::Ollama => &["serve"],
            _ => &[],
        }
    }

    /// Environment variable a `serve` process reads its bind address from
    pub fn bind_env(&self) -> Option<&'static str> {
        match self {
            Backend::Ollama => Some("OLLAMA_HOST"),
            _ => None,
        }
    }

    /// True when one server process serves every instance of this backend
    pub fn is_single_endpoint(&self) -> bool {
        matches!(self, Backend::Ollama)
    }

    /// Hub namespace searched for models packaged for this backend
    pub fn community_namespace(&self) -> Option<&'static str> {
        match self {
            Backend::Mlx => Some("mlx-community"),
            _ => None,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

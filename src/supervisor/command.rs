//! Backend command construction
//!
//! Turns an instance configuration into the program and arguments to spawn.

use std::collections::BTreeMap;

use crate::supervisor::LaunchError;
use crate::system::platform::Platform;
use crate::types::{Backend, InstanceConfig};

/// A concrete command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment for the child
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    /// Human readable command line, for logs
    pub fn command_line(&self) -> String {
        let mut line = String::new();
        for (key, value) in &self.env {
            line.push_str(&format!("{}={} ", key, value));
        }
        line.push_str(&self.program);
        for arg in &self.args {
            line.push(' ');
            if arg.contains(char::is_whitespace) {
                line.push('"');
                line.push_str(arg);
                line.push('"');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

/// Program launched for `backend`: the configured override, else the default
pub fn resolve_executable(overrides: &BTreeMap<Backend, String>, backend: Backend) -> Option<String> {
    overrides
        .get(&backend)
        .cloned()
        .or_else(|| backend.default_executable().map(str::to_string))
}

/// Build the launch command for `config`.
///
/// `executable` is the resolved program for the backend (override or default).
/// Single-endpoint backends get a bare `serve` invocation bound through the
/// environment to the host and port of the instance that launches it.
pub fn build_launch_spec(
    config: &InstanceConfig,
    executable: Option<String>,
    platform: &Platform,
) -> Result<LaunchSpec, LaunchError> {
    let backend = config.backend;

    if let Some(reason) = backend.unavailable_reason(platform) {
        return Err(LaunchError::Unavailable { backend, reason });
    }

    let program = executable.ok_or(LaunchError::NoExecutable(backend))?;
    let mut args: Vec<String> = backend
        .launch_prefix()
        .iter()
        .map(|a| a.to_string())
        .collect();

    if backend.is_single_endpoint() {
        let env = backend
            .bind_env()
            .map(|key| (key.to_string(), format!("{}:{}", config.host, config.port)))
            .into_iter()
            .collect();
        return Ok(LaunchSpec { program, args, env });
    }

    args.extend([
        "--model".to_string(),
        config.model.clone(),
        "--host".to_string(),
        config.host.clone(),
        "--port".to_string(),
        config.port.to_string(),
    ]);

    if let Some(custom) = &config.custom_args {
        args.extend(custom.iter().cloned());
    }

    Ok(LaunchSpec {
        program,
        args,
        env: Vec::new(),
    })
}

//! Process supervisor
//!
//! Owns the table of running backend processes, keyed by instance id.
//! Callers serialize access (the orchestrator keeps the supervisor behind its
//! state lock), so one id never has two live processes.

pub mod command;
pub mod launcher;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::logs::{LogAggregator, ORCHESTRATOR_SOURCE};
use crate::system::platform::Platform;
use crate::types::{Backend, InstanceConfig, InstanceId};

pub use command::{build_launch_spec, resolve_executable, LaunchSpec};
pub use launcher::{Launcher, ProcessExit, ProcessHandle, TokioLauncher};

/// Launch errors
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("{backend} is unavailable on this platform: {reason}")]
    Unavailable {
        backend: Backend,
        reason: &'static str,
    },
    #[error("No executable configured for {0}")]
    NoExecutable(Backend),
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result of a successful `start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new process was spawned for the instance
    Launched,
    /// The instance already had a live process
    AlreadyRunning,
    /// The instance joined its backend's shared server
    Attached,
}

enum Slot {
    Owned(Box<dyn ProcessHandle>),
    Shared(Backend),
}

struct Tracked {
    slot: Slot,
    started: Instant,
}

/// One server process serving every instance of a single-endpoint backend
struct SharedServer {
    handle: Box<dyn ProcessHandle>,
    users: BTreeSet<InstanceId>,
}

/// Launches and terminates backend processes
pub struct ProcessSupervisor {
    launcher: Arc<dyn Launcher>,
    logs: Arc<LogAggregator>,
    executables: BTreeMap<Backend, String>,
    platform: Platform,
    processes: HashMap<InstanceId, Tracked>,
    shared: HashMap<Backend, SharedServer>,
}

impl ProcessSupervisor {
    pub fn new(
        launcher: Arc<dyn Launcher>,
        logs: Arc<LogAggregator>,
        executables: BTreeMap<Backend, String>,
        platform: Platform,
    ) -> Self {
        Self {
            launcher,
            logs,
            executables,
            platform,
            processes: HashMap::new(),
            shared: HashMap::new(),
        }
    }

    /// Launch the backend for `config`. The caller checks `enabled`.
    pub async fn start(&mut self, config: &InstanceConfig) -> Result<StartOutcome, LaunchError> {
        if self.is_running(&config.id) {
            return Ok(StartOutcome::AlreadyRunning);
        }
        // Exited earlier; forget it so it can be relaunched
        self.processes.remove(&config.id);

        let executable = resolve_executable(&self.executables, config.backend);
        let spec = match build_launch_spec(config, executable, &self.platform) {
            Ok(spec) => spec,
            Err(e) => return Err(self.launch_failed(config, e)),
        };

        if config.backend.is_single_endpoint() {
            return self.attach_shared(config, &spec).await;
        }

        tracing::info!(
            "Starting {} ({}): {}",
            config.role.display_name(),
            config.id,
            spec.command_line()
        );
        let mut handle = match self.launcher.spawn(&spec).await {
            Ok(handle) => handle,
            Err(e) => return Err(self.launch_failed(config, e)),
        };

        self.logs.append(
            ORCHESTRATOR_SOURCE,
            format!(
                "Started {} on {}:{} (pid {})",
                config.role.display_name(),
                config.host,
                config.port,
                describe_pid(handle.pid())
            ),
        );
        self.attach_output(handle.as_mut(), config.role.display_name());
        self.track(config.id, Slot::Owned(handle));
        Ok(StartOutcome::Launched)
    }

    async fn attach_shared(
        &mut self,
        config: &InstanceConfig,
        spec: &LaunchSpec,
    ) -> Result<StartOutcome, LaunchError> {
        let backend = config.backend;

        let alive = match self.shared.get_mut(&backend) {
            Some(server) => server.handle.try_exit().is_none(),
            None => false,
        };

        if !alive {
            // Instances still attached to a dead server move to the new one
            let users = self
                .shared
                .remove(&backend)
                .map(|server| server.users)
                .unwrap_or_default();
            tracing::info!("Starting shared {} server: {}", backend, spec.command_line());
            let mut handle = match self.launcher.spawn(spec).await {
                Ok(handle) => handle,
                Err(e) => return Err(self.launch_failed(config, e)),
            };
            self.logs.append(
                ORCHESTRATOR_SOURCE,
                format!(
                    "Started shared {} server (pid {})",
                    backend.display_name(),
                    describe_pid(handle.pid())
                ),
            );
            self.attach_output(handle.as_mut(), backend.display_name());
            self.shared.insert(
                backend,
                SharedServer { handle, users },
            );
        }

        if let Some(server) = self.shared.get_mut(&backend) {
            server.users.insert(config.id);
        }
        self.track(config.id, Slot::Shared(backend));
        Ok(StartOutcome::Attached)
    }

    fn track(&mut self, id: InstanceId, slot: Slot) {
        self.processes.insert(
            id,
            Tracked {
                slot,
                started: Instant::now(),
            },
        );
    }

    fn launch_failed(&self, config: &InstanceConfig, error: LaunchError) -> LaunchError {
        tracing::error!(
            "Failed to start {} ({}): {}",
            config.role.display_name(),
            config.id,
            error
        );
        self.logs.append(
            ORCHESTRATOR_SOURCE,
            format!("Failed to start {}: {}", config.role.display_name(), error),
        );
        error
    }

    /// Forward every output line to the log buffer, tagged with `source`
    fn attach_output(&self, handle: &mut dyn ProcessHandle, source: &str) {
        let Some(mut lines) = handle.take_output() else {
            return;
        };
        let logs = self.logs.clone();
        let source = source.to_string();
        tokio::spawn(async move {
            while let Some(line) = lines.recv().await {
                logs.append(&source, line);
            }
        });
    }

    /// Whether `id` has a live process (its own or a shared server)
    pub fn is_running(&mut self, id: &InstanceId) -> bool {
        let backend = match self.processes.get_mut(id) {
            None => return false,
            Some(Tracked {
                slot: Slot::Owned(handle),
                ..
            }) => return handle.try_exit().is_none(),
            Some(Tracked {
                slot: Slot::Shared(backend),
                ..
            }) => *backend,
        };
        match self.shared.get_mut(&backend) {
            Some(server) => server.handle.try_exit().is_none(),
            None => false,
        }
    }

    /// Whether the process table has an entry for `id`, alive or not
    pub fn is_tracked(&self, id: &InstanceId) -> bool {
        self.processes.contains_key(id)
    }

    /// Terminate the process of `id`, if any. Returns whether one was tracked.
    pub async fn stop(&mut self, id: &InstanceId) -> bool {
        let Some(tracked) = self.processes.remove(id) else {
            return false;
        };

        match tracked.slot {
            Slot::Owned(mut handle) => {
                tracing::info!("Stopping instance {}", id);
                handle.kill().await;
            }
            Slot::Shared(backend) => {
                let last_user = match self.shared.get_mut(&backend) {
                    Some(server) => {
                        server.users.remove(id);
                        server.users.is_empty()
                    }
                    None => false,
                };
                if last_user {
                    if let Some(mut server) = self.shared.remove(&backend) {
                        tracing::info!("Stopping shared {} server", backend);
                        server.handle.kill().await;
                    }
                }
            }
        }

        self.logs
            .append(ORCHESTRATOR_SOURCE, format!("Stopped instance {}", id));
        true
    }

    /// Terminate every tracked process
    pub async fn stop_all(&mut self) {
        let ids: Vec<InstanceId> = self.processes.keys().copied().collect();
        for id in ids {
            self.stop(&id).await;
        }
        let servers: Vec<_> = self.shared.drain().collect();
        for (backend, mut server) in servers {
            tracing::info!("Stopping shared {} server", backend);
            server.handle.kill().await;
        }
    }

    /// Drop processes that exited on their own and report them
    pub fn reap_exited(&mut self) -> Vec<(InstanceId, ProcessExit)> {
        let mut exited = Vec::new();

        let mut dead_shared = Vec::new();
        for (backend, server) in self.shared.iter_mut() {
            if let Some(exit) = server.handle.try_exit() {
                dead_shared.push(*backend);
                for id in &server.users {
                    exited.push((*id, exit));
                }
            }
        }
        for backend in dead_shared {
            self.shared.remove(&backend);
        }

        for (id, tracked) in self.processes.iter_mut() {
            if let Slot::Owned(handle) = &mut tracked.slot {
                if let Some(exit) = handle.try_exit() {
                    exited.push((*id, exit));
                }
            }
        }

        for (id, exit) in &exited {
            self.processes.remove(id);
            let code = exit
                .code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            tracing::warn!("Instance {} exited ({})", id, code);
            self.logs
                .append(ORCHESTRATOR_SOURCE, format!("Instance {} exited ({})", id, code));
        }

        exited
    }

    /// Time since the process of `id` was launched
    pub fn uptime(&self, id: &InstanceId) -> Option<Duration> {
        self.processes.get(id).map(|t| t.started.elapsed())
    }

    pub fn tracked_ids(&self) -> Vec<InstanceId> {
        self.processes.keys().copied().collect()
    }
}

fn describe_pid(pid: Option<u32>) -> String {
    pid.map(|p| p.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

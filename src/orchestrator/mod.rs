//! Orchestrator facade
//!
//! Composes the instance store, the process supervisor, the health monitor
//! and model discovery behind one async API. All mutable state sits behind a
//! single lock; `start`, `stop`, `update_instance` and `remove_instance` hold
//! it for their whole critical section. Background work only keeps `Weak`
//! references, so results arriving after teardown are dropped.

mod events;

pub use events::OrchestratorEvent;

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::{JoinHandle, JoinSet};

use crate::discovery::ModelDiscovery;
use crate::health::{self, HealthChecker, HealthMonitor, HealthSink, ProbeOutcome, ProbeTarget};
use crate::logs::{LogAggregator, LogEntry, ORCHESTRATOR_SOURCE};
use crate::storage::instances::{InstanceStore, StoreError};
use crate::storage::settings::OrchestratorSettings;
use crate::storage::StorageError;
use crate::supervisor::{Launcher, ProcessSupervisor, StartOutcome, TokioLauncher};
use crate::system::platform::Platform;
use crate::types::{
    Backend, DiscoveredModel, InstanceConfig, InstanceId, InstanceState, InstanceStatus, Role,
};

const EVENT_CAPACITY: usize = 256;

/// Errors of facade mutations
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Everything guarded by the orchestrator lock
struct State {
    store: InstanceStore,
    statuses: BTreeMap<InstanceId, InstanceStatus>,
    supervisor: ProcessSupervisor,
    /// Bumped on every start, stop, update and remove
    epochs: HashMap<InstanceId, u64>,
    discovered: Vec<DiscoveredModel>,
}

impl State {
    fn bump(&mut self, id: InstanceId) {
        *self.epochs.entry(id).or_insert(0) += 1;
    }

    fn epoch(&self, id: &InstanceId) -> u64 {
        self.epochs.get(id).copied().unwrap_or(0)
    }
}

struct Inner {
    state: Mutex<State>,
    logs: Arc<LogAggregator>,
    discovery: ModelDiscovery,
    checker: HealthChecker,
    events: broadcast::Sender<OrchestratorEvent>,
}

impl Inner {
    fn publish(&self, event: OrchestratorEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn start(&self, id: InstanceId) -> bool {
        let mut state = self.state.lock().await;
        self.start_locked(&mut state, id).await
    }

    async fn start_locked(&self, state: &mut State, id: InstanceId) -> bool {
        let Some(config) = state.store.get(&id).cloned() else {
            tracing::debug!("Start requested for unknown instance {}", id);
            return false;
        };
        if !config.enabled {
            tracing::debug!("Instance {} is disabled, not starting", id);
            return false;
        }

        match state.supervisor.start(&config).await {
            Ok(StartOutcome::AlreadyRunning) => true,
            Ok(_) => {
                state.bump(id);
                true
            }
            Err(e) => {
                self.publish(OrchestratorEvent::LaunchFailed {
                    id,
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    /// Terminate `id` and write its stopped status
    async fn stop_locked(&self, state: &mut State, id: InstanceId) -> Option<InstanceStatus> {
        let config = state.store.get(&id).cloned()?;
        state.bump(id);
        state.supervisor.stop(&id).await;

        let status = InstanceStatus::stopped(&config);
        state.statuses.insert(id, status.clone());
        self.publish(OrchestratorEvent::StatusChanged(status.clone()));
        Some(status)
    }

    async fn set_discovered(&self, models: Vec<DiscoveredModel>) {
        let count = models.len();
        self.state.lock().await.discovered = models;
        self.publish(OrchestratorEvent::DiscoveredModelsChanged(count));
    }
}

/// Health sink that never keeps the orchestrator alive
struct WeakInner(Weak<Inner>);

#[async_trait]
impl HealthSink for WeakInner {
    async fn targets(&self) -> Option<Vec<ProbeTarget>> {
        let inner = self.0.upgrade()?;
        let mut state = inner.state.lock().await;

        state.supervisor.reap_exited();

        let targets = state
            .store
            .all()
            .filter(|config| config.enabled)
            .map(|config| ProbeTarget {
                id: config.id,
                host: config.host.clone(),
                port: config.port,
                epoch: state.epoch(&config.id),
            })
            .collect();
        Some(targets)
    }

    async fn record(&self, target: ProbeTarget, outcome: ProbeOutcome) {
        let Some(inner) = self.0.upgrade() else {
            return;
        };
        let mut state = inner.state.lock().await;

        if state.epoch(&target.id) != target.epoch {
            tracing::debug!("Discarding stale probe of {}", target.id);
            return;
        }
        let Some(config) = state.store.get(&target.id).filter(|c| c.enabled).cloned() else {
            return;
        };

        let was_running = state
            .statuses
            .get(&target.id)
            .map(|s| s.running)
            .unwrap_or(false);
        if was_running != outcome.healthy {
            tracing::info!(
                "{} ({}) is now {}",
                config.role.display_name(),
                config.id,
                if outcome.healthy { "healthy" } else { "unhealthy" }
            );
        }

        let status = InstanceStatus {
            running: outcome.healthy,
            uptime_secs: state.supervisor.uptime(&config.id).map(|d| d.as_secs()),
            request_count: outcome.request_count,
            avg_latency_ms: outcome.avg_latency_ms,
            error: outcome.error,
            ..InstanceStatus::stopped(&config)
        };
        state.statuses.insert(config.id, status.clone());
        inner.publish(OrchestratorEvent::StatusChanged(status));
    }
}

/// Local model instance orchestrator
pub struct Orchestrator {
    inner: Arc<Inner>,
    monitor: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Orchestrator spawning real processes on the current platform.
    ///
    /// Must be called from within a tokio runtime; the health timer starts
    /// immediately.
    pub fn new(settings: OrchestratorSettings) -> Result<Self, OrchestratorError> {
        Self::with_launcher(settings, Arc::new(TokioLauncher), *Platform::current())
    }

    pub fn with_launcher(
        mut settings: OrchestratorSettings,
        launcher: Arc<dyn Launcher>,
        platform: Platform,
    ) -> Result<Self, OrchestratorError> {
        settings.validate();

        let store = InstanceStore::load(settings.instances_path()?);
        tracing::info!(
            "Loaded {} instance(s) from {}",
            store.len(),
            store.path().display()
        );

        let logs = Arc::new(LogAggregator::new(settings.log_capacity, settings.log_trim));
        let supervisor = ProcessSupervisor::new(
            launcher,
            logs.clone(),
            settings.executables.clone(),
            platform,
        );
        let checker = HealthChecker::new(settings.probe_timeout());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = Arc::new(Inner {
            state: Mutex::new(State {
                store,
                statuses: BTreeMap::new(),
                supervisor,
                epochs: HashMap::new(),
                discovered: Vec::new(),
            }),
            logs,
            discovery: ModelDiscovery::from_settings(&settings, platform),
            checker: checker.clone(),
            events,
        });

        let sink: Arc<dyn HealthSink> = Arc::new(WeakInner(Arc::downgrade(&inner)));
        let monitor = HealthMonitor::new(checker, settings.health_interval()).spawn(sink);

        Ok(Self {
            inner,
            monitor: std::sync::Mutex::new(Some(monitor)),
        })
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    pub async fn add_instance(&self, config: InstanceConfig) -> Result<(), OrchestratorError> {
        let mut state = self.inner.state.lock().await;
        let id = config.id;
        state.store.add(config)?;
        tracing::info!("Added instance {}", id);
        self.inner.publish(OrchestratorEvent::InstancesChanged);
        Ok(())
    }

    /// Stop, delete and retire `id`. Returns whether it existed.
    pub async fn remove_instance(&self, id: InstanceId) -> Result<bool, OrchestratorError> {
        let mut state = self.inner.state.lock().await;
        if !state.store.contains(&id) {
            return Ok(false);
        }

        state.bump(id);
        state.supervisor.stop(&id).await;
        state.store.remove(&id)?;
        state.epochs.remove(&id);

        if state.statuses.remove(&id).is_some() {
            self.inner.publish(OrchestratorEvent::StatusRemoved(id));
        }
        tracing::info!("Removed instance {}", id);
        self.inner.publish(OrchestratorEvent::InstancesChanged);
        Ok(true)
    }

    /// Replace the config of an existing instance.
    ///
    /// A running instance is stopped before the write and restarted after it
    /// when it stays enabled. Invalid configs are rejected before anything
    /// is touched.
    pub async fn update_instance(&self, config: InstanceConfig) -> Result<(), OrchestratorError> {
        let mut state = self.inner.state.lock().await;
        let id = config.id;

        if !state.store.contains(&id) {
            return Err(StoreError::Unknown(id).into());
        }
        if let Some(reason) = config.validation_error() {
            return Err(StoreError::Invalid { id, reason }.into());
        }

        let was_running = state.supervisor.is_tracked(&id);
        if was_running {
            self.inner.stop_locked(&mut state, id).await;
        }

        let restart = was_running && config.enabled;
        state.store.update(config)?;
        state.bump(id);
        tracing::info!("Updated instance {}", id);
        self.inner.publish(OrchestratorEvent::InstancesChanged);

        if restart {
            self.inner.start_locked(&mut state, id).await;
        }
        Ok(())
    }

    /// First enabled instance serving `role`
    pub async fn get_instance(&self, role: Role) -> Option<InstanceConfig> {
        self.inner.state.lock().await.store.get_by_role(role).cloned()
    }

    pub async fn instance(&self, id: InstanceId) -> Option<InstanceConfig> {
        self.inner.state.lock().await.store.get(&id).cloned()
    }

    pub async fn instances(&self) -> Vec<InstanceConfig> {
        self.inner.state.lock().await.store.all().cloned().collect()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Launch the backend of `id`. `false` when unknown, disabled or failed.
    pub async fn start(&self, id: InstanceId) -> bool {
        self.inner.start(id).await
    }

    /// Stop `id` and return its fresh status; `None` when unknown
    pub async fn stop(&self, id: InstanceId) -> Option<InstanceStatus> {
        let mut state = self.inner.state.lock().await;
        self.inner.stop_locked(&mut state, id).await
    }

    pub async fn stop_all(&self) {
        let mut state = self.inner.state.lock().await;
        for id in state.supervisor.tracked_ids() {
            self.inner.stop_locked(&mut state, id).await;
        }
        state.supervisor.stop_all().await;
    }

    /// Start every enabled auto-start instance. Returns (started, failed).
    pub async fn start_all(&self) -> (usize, usize) {
        let ids: Vec<InstanceId> = {
            let state = self.inner.state.lock().await;
            state
                .store
                .all()
                .filter(|c| c.enabled && c.auto_start)
                .map(|c| c.id)
                .collect()
        };

        let mut starts = JoinSet::new();
        for id in ids {
            let inner = self.inner.clone();
            starts.spawn(async move { inner.start(id).await });
        }

        let (mut started, mut failed) = (0, 0);
        while let Some(joined) = starts.join_next().await {
            match joined {
                Ok(true) => started += 1,
                Ok(false) => failed += 1,
                Err(e) => {
                    tracing::warn!("Start task failed: {}", e);
                    failed += 1;
                }
            }
        }

        tracing::info!("Auto-start finished: {} started, {} failed", started, failed);
        (started, failed)
    }

    pub async fn statuses(&self) -> Vec<InstanceStatus> {
        self.inner.state.lock().await.statuses.values().cloned().collect()
    }

    pub async fn status(&self, id: InstanceId) -> Option<InstanceStatus> {
        self.inner.state.lock().await.statuses.get(&id).cloned()
    }

    pub async fn instance_state(&self, id: InstanceId) -> InstanceState {
        let mut state = self.inner.state.lock().await;
        if !state.store.contains(&id) {
            return InstanceState::Unconfigured;
        }
        if !state.supervisor.is_running(&id) {
            return InstanceState::Stopped;
        }
        match state.statuses.get(&id) {
            Some(status) if status.running => InstanceState::Healthy,
            _ => InstanceState::Launching,
        }
    }

    /// Run one health tick now, outside the timer
    pub async fn run_health_check(&self) {
        health::tick(&self.inner.checker, self.sink()).await;
    }

    fn sink(&self) -> Arc<dyn HealthSink> {
        Arc::new(WeakInner(Arc::downgrade(&self.inner)))
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    /// Rescan local caches and replace the discovered list
    pub async fn discover_installed_models(&self) -> Vec<DiscoveredModel> {
        let models = self.inner.discovery.discover_installed().await;
        self.inner.set_discovered(models.clone()).await;
        models
    }

    /// Rescan local caches without waiting for the result
    pub fn discover_in_background(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let discovery = self.inner.discovery.clone();
        tokio::spawn(async move {
            let models = discovery.discover_installed().await;
            match weak.upgrade() {
                Some(inner) => inner.set_discovered(models).await,
                None => tracing::debug!("Orchestrator gone, dropping discovery results"),
            }
        })
    }

    /// Search the hub. Results found in the last local scan are marked installed.
    pub async fn search_models(&self, query: &str, backend: Backend) -> Vec<DiscoveredModel> {
        let installed = self.discovered_models().await;
        self.inner.discovery.search(query, backend, &installed).await
    }

    /// Rescan local caches, then add hub results for `query` when given
    pub async fn discover_models(
        &self,
        query: Option<&str>,
        backend: Backend,
    ) -> Vec<DiscoveredModel> {
        let models = self.inner.discovery.discover(query, backend).await;
        let installed = models.iter().filter(|m| m.installed).cloned().collect();
        self.inner.set_discovered(installed).await;
        models
    }

    pub async fn discovered_models(&self) -> Vec<DiscoveredModel> {
        self.inner.state.lock().await.discovered.clone()
    }

    // =========================================================================
    // Logs and events
    // =========================================================================

    pub fn logs(&self) -> Vec<LogEntry> {
        self.inner.logs.snapshot()
    }

    pub fn log_aggregator(&self) -> Arc<LogAggregator> {
        self.inner.logs.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.inner.events.subscribe()
    }

    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogEntry> {
        self.inner.logs.subscribe()
    }

    /// Stop the health timer, then every process
    pub async fn shutdown(&self) {
        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(monitor) = monitor {
            monitor.abort();
            let _ = monitor.await;
        }

        self.stop_all().await;
        self.inner
            .logs
            .append(ORCHESTRATOR_SOURCE, "Orchestrator shut down");
        tracing::info!("Orchestrator shut down");
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        let monitor = self
            .monitor
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(monitor) = monitor {
            monitor.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedLauncher, TestServer};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        orchestrator: Orchestrator,
        launcher: Arc<ScriptedLauncher>,
        dir: TempDir,
    }

    fn settings(dir: &TempDir) -> OrchestratorSettings {
        let mut settings = OrchestratorSettings::with_data_dir(dir.path());
        settings.cache_roots = Some(Vec::new());
        settings.probe_timeout_ms = 500;
        settings.hub_url = "http://127.0.0.1:9".to_string();
        settings
    }

    fn linux_box() -> Platform {
        Platform {
            apple_silicon: false,
            cuda: false,
        }
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(ScriptedLauncher::new());
        let orchestrator =
            Orchestrator::with_launcher(settings(&dir), launcher.clone(), linux_box()).unwrap();
        Harness {
            orchestrator,
            launcher,
            dir,
        }
    }

    async fn add(h: &Harness, role: Role, model: &str, port: u16) -> InstanceConfig {
        let mut config = InstanceConfig::new(role, Backend::LlamaCpp, model);
        config.port = port;
        h.orchestrator.add_instance(config.clone()).await.unwrap();
        config
    }

    #[tokio::test]
    async fn test_bootstrap_instances() {
        let h = harness();
        let instances = h.orchestrator.instances().await;
        assert_eq!(instances.len(), 2);

        let router = h.orchestrator.get_instance(Role::ModelRouter).await.unwrap();
        assert_eq!(router.port, 8001);
        assert_eq!(router.backend, Backend::preferred());
        assert!(h.orchestrator.get_instance(Role::Embedder).await.is_none());
        assert!(h.dir.path().join("instances.json").exists());
    }

    #[tokio::test]
    async fn test_start_unknown_or_disabled() {
        let h = harness();
        assert!(!h.orchestrator.start(InstanceId::new()).await);

        let mut config = InstanceConfig::new(Role::Custom, Backend::LlamaCpp, "org/x");
        config.enabled = false;
        h.orchestrator.add_instance(config.clone()).await.unwrap();
        assert!(!h.orchestrator.start(config.id).await);

        assert_eq!(h.launcher.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_start_twice_spawns_once() {
        let h = harness();
        let config = add(&h, Role::Summarizer, "org/sum", 9100).await;

        assert!(h.orchestrator.start(config.id).await);
        assert!(h.orchestrator.start(config.id).await);
        assert_eq!(h.launcher.spawn_count(), 1);
        assert_eq!(h.orchestrator.instance_state(config.id).await, InstanceState::Launching);
    }

    #[tokio::test]
    async fn test_double_stop_yields_identical_status() {
        let h = harness();
        let config = add(&h, Role::Summarizer, "org/sum", 9101).await;
        h.orchestrator.start(config.id).await;

        let first = h.orchestrator.stop(config.id).await.unwrap();
        let second = h.orchestrator.stop(config.id).await.unwrap();
        assert_eq!(first, second);
        assert!(!first.running);
        assert_eq!(h.launcher.live(), 0);
        assert!(h.orchestrator.stop(InstanceId::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_update_restarts_without_overlap() {
        let h = harness();
        let mut config = add(&h, Role::CodeAssistant, "org/old-coder", 9102).await;
        h.orchestrator.start(config.id).await;

        config.model = "org/new-coder".to_string();
        h.orchestrator.update_instance(config.clone()).await.unwrap();

        assert_eq!(h.launcher.spawn_count(), 2);
        assert_eq!(h.launcher.live(), 1);
        assert_eq!(h.launcher.peak_live(), 1);
        assert!(h.launcher.spawned()[1].args.contains(&"org/new-coder".to_string()));
        assert_eq!(
            h.orchestrator.instance(config.id).await.unwrap().model,
            "org/new-coder"
        );
    }

    #[tokio::test]
    async fn test_update_of_stopped_instance_does_not_start() {
        let h = harness();
        let mut config = add(&h, Role::Reasoner, "org/r1", 9103).await;

        config.max_context_length = 4096;
        h.orchestrator.update_instance(config).await.unwrap();
        assert_eq!(h.launcher.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_update_disabling_stops_for_good() {
        let h = harness();
        let mut config = add(&h, Role::Reasoner, "org/r1", 9104).await;
        h.orchestrator.start(config.id).await;

        config.enabled = false;
        h.orchestrator.update_instance(config.clone()).await.unwrap();
        assert_eq!(h.launcher.live(), 0);
        assert_eq!(h.launcher.spawn_count(), 1);
        assert_eq!(h.orchestrator.instance_state(config.id).await, InstanceState::Stopped);
    }

    #[tokio::test]
    async fn test_invalid_update_leaves_instance_running() {
        let h = harness();
        let mut config = add(&h, Role::Summarizer, "org/sum", 9105).await;
        h.orchestrator.start(config.id).await;

        config.port = 0;
        let err = h.orchestrator.update_instance(config.clone()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Store(StoreError::Invalid { .. })));
        assert_eq!(h.launcher.live(), 1);
        assert_eq!(h.launcher.spawn_count(), 1);

        let unknown = InstanceConfig::new(Role::Custom, Backend::LlamaCpp, "org/x");
        assert!(h.orchestrator.update_instance(unknown).await.is_err());
    }

    fn shared() -> (Arc<Orchestrator>, Arc<ScriptedLauncher>, TempDir) {
        let h = harness();
        (Arc::new(h.orchestrator), h.launcher, h.dir)
    }

    fn spawn_start(orchestrator: &Arc<Orchestrator>, id: InstanceId) -> JoinHandle<bool> {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.start(id).await })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_starts_spawn_one_process() {
        let (orchestrator, launcher, _dir) = shared();

        for i in 0..25u16 {
            let mut config = InstanceConfig::new(Role::Custom, Backend::LlamaCpp, "org/race");
            config.port = 9200 + i;
            orchestrator.add_instance(config.clone()).await.unwrap();

            let before = launcher.spawn_count();
            let first = spawn_start(&orchestrator, config.id);
            let second = spawn_start(&orchestrator, config.id);
            assert!(first.await.unwrap());
            assert!(second.await.unwrap());
            assert_eq!(launcher.spawn_count(), before + 1, "iteration {}", i);
            assert_eq!(launcher.live(), 1);

            assert!(orchestrator.remove_instance(config.id).await.unwrap());
            assert_eq!(launcher.live(), 0);
        }
        assert_eq!(launcher.peak_live(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_start_racing_remove_leaves_no_process() {
        let (orchestrator, launcher, _dir) = shared();

        for i in 0..50u16 {
            let mut config = InstanceConfig::new(Role::Custom, Backend::LlamaCpp, "org/race");
            config.port = 9300 + i;
            orchestrator.add_instance(config.clone()).await.unwrap();

            let starts = [
                spawn_start(&orchestrator, config.id),
                spawn_start(&orchestrator, config.id),
            ];
            let remover = {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move { orchestrator.remove_instance(config.id).await })
            };

            assert!(remover.await.unwrap().unwrap());
            for start in starts {
                start.await.unwrap();
            }

            assert_eq!(launcher.live(), 0, "iteration {}", i);
            assert!(launcher.peak_live() <= 1);
            assert!(orchestrator.instance(config.id).await.is_none());
            assert!(!orchestrator.start(config.id).await);
        }
    }

    #[tokio::test]
    async fn test_remove_clears_everything() {
        let h = harness();
        let config = add(&h, Role::Embedder, "org/embed", 9106).await;
        h.orchestrator.start(config.id).await;
        h.orchestrator.stop(config.id).await;
        h.orchestrator.start(config.id).await;
        let mut events = h.orchestrator.subscribe();

        assert!(h.orchestrator.remove_instance(config.id).await.unwrap());
        assert_eq!(h.launcher.live(), 0);
        assert!(h.orchestrator.instance(config.id).await.is_none());
        assert!(h.orchestrator.status(config.id).await.is_none());
        assert_eq!(
            h.orchestrator.instance_state(config.id).await,
            InstanceState::Unconfigured
        );
        assert_eq!(
            events.recv().await.unwrap(),
            OrchestratorEvent::StatusRemoved(config.id)
        );
        assert_eq!(events.recv().await.unwrap(), OrchestratorEvent::InstancesChanged);

        // Removed ids are never reused
        let err = h.orchestrator.add_instance(config.clone()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Store(StoreError::Retired(_))));
        assert!(!h.orchestrator.remove_instance(config.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_coder_scenario_becomes_healthy() {
        let server = TestServer::start(|path| {
            (path == "/health").then(|| (200, r#"{"status":"ok"}"#.to_string()))
        })
        .await;
        let h = harness();
        let config = add(&h, Role::CodeAssistant, "org/Coder-32B-4bit", server.port).await;

        assert!(h.orchestrator.start(config.id).await);
        let spec = &h.launcher.spawned()[0];
        assert_eq!(spec.program, "llama-server");
        let port = server.port.to_string();
        assert_eq!(
            spec.args,
            vec![
                "--model",
                "org/Coder-32B-4bit",
                "--host",
                "127.0.0.1",
                "--port",
                port.as_str(),
                "--ctx-size",
                "32768"
            ]
        );
        assert_eq!(h.orchestrator.instance_state(config.id).await, InstanceState::Launching);

        h.orchestrator.run_health_check().await;
        let status = h.orchestrator.status(config.id).await.unwrap();
        assert!(status.running);
        assert!(status.error.is_none());
        assert!(status.uptime_secs.is_some());
        assert_eq!(h.orchestrator.instance_state(config.id).await, InstanceState::Healthy);

        let stopped = h.orchestrator.stop(config.id).await.unwrap();
        assert!(!stopped.running);
        assert_eq!(h.orchestrator.instance_state(config.id).await, InstanceState::Stopped);
    }

    #[tokio::test]
    async fn test_unhealthy_probe_records_error() {
        let server = TestServer::start(|_| Some((503, String::new()))).await;
        let h = harness();
        let config = add(&h, Role::Summarizer, "org/sum", server.port).await;
        h.orchestrator.start(config.id).await;

        h.orchestrator.run_health_check().await;
        let status = h.orchestrator.status(config.id).await.unwrap();
        assert!(!status.running);
        assert_eq!(status.error.as_deref(), Some("HTTP 503"));
        // Purely observational: the process is left alone
        assert_eq!(h.launcher.live(), 1);
    }

    #[tokio::test]
    async fn test_stale_probe_is_discarded() {
        let h = harness();
        let config = add(&h, Role::Summarizer, "org/sum", 9107).await;
        h.orchestrator.start(config.id).await;

        let sink = h.orchestrator.sink();
        let targets = sink.targets().await.unwrap();
        let target = targets.into_iter().find(|t| t.id == config.id).unwrap();

        h.orchestrator.stop(config.id).await;
        sink.record(
            target,
            ProbeOutcome {
                healthy: true,
                latency: Duration::from_millis(3),
                request_count: None,
                avg_latency_ms: Some(3.0),
                error: None,
            },
        )
        .await;

        assert!(!h.orchestrator.status(config.id).await.unwrap().running);
    }

    #[tokio::test]
    async fn test_probe_after_remove_is_discarded() {
        let h = harness();
        let config = add(&h, Role::Summarizer, "org/sum", 9108).await;

        let sink = h.orchestrator.sink();
        let target = sink
            .targets()
            .await
            .unwrap()
            .into_iter()
            .find(|t| t.id == config.id)
            .unwrap();

        h.orchestrator.remove_instance(config.id).await.unwrap();
        sink.record(
            target,
            ProbeOutcome {
                healthy: true,
                latency: Duration::from_millis(1),
                request_count: None,
                avg_latency_ms: None,
                error: None,
            },
        )
        .await;
        assert!(h.orchestrator.status(config.id).await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_ports_are_accepted() {
        let h = harness();
        add(&h, Role::Summarizer, "org/a", 9200).await;
        add(&h, Role::TaskClassifier, "org/b", 9200).await;
        assert_eq!(h.orchestrator.instances().await.len(), 4);
    }

    #[tokio::test]
    async fn test_start_all_counts() {
        let h = harness();
        let mut extra = InstanceConfig::new(Role::Summarizer, Backend::LlamaCpp, "org/sum");
        extra.auto_start = false;
        h.orchestrator.add_instance(extra).await.unwrap();

        assert_eq!(h.orchestrator.start_all().await, (2, 0));
        assert_eq!(h.launcher.live(), 2);
    }

    #[tokio::test]
    async fn test_launch_failure_is_reported() {
        let h = harness();
        h.launcher.fail_spawns(true);
        let mut events = h.orchestrator.subscribe();

        assert_eq!(h.orchestrator.start_all().await, (0, 2));

        let event = events.recv().await.unwrap();
        assert!(matches!(event, OrchestratorEvent::LaunchFailed { .. }));
        assert!(h
            .orchestrator
            .logs()
            .iter()
            .any(|e| e.line.starts_with("Failed to start")));
        assert!(h.orchestrator.statuses().await.is_empty());
    }

    #[tokio::test]
    async fn test_exited_process_is_reaped_on_tick() {
        let h = harness();
        let config = add(&h, Role::Summarizer, "org/sum", 9109).await;
        h.orchestrator.start(config.id).await;

        h.launcher.exit_all(Some(1));
        h.orchestrator.run_health_check().await;
        assert_eq!(h.orchestrator.instance_state(config.id).await, InstanceState::Stopped);
        assert!(h.orchestrator.logs().iter().any(|e| e.line.contains("exited (1)")));

        assert!(h.orchestrator.start(config.id).await);
        assert_eq!(h.launcher.spawn_count(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let h = harness();
        h.orchestrator.start_all().await;
        assert_eq!(h.launcher.live(), 2);

        h.orchestrator.shutdown().await;
        assert_eq!(h.launcher.live(), 0);
        assert!(h.orchestrator.statuses().await.iter().all(|s| !s.running));
    }

    #[tokio::test]
    async fn test_configuration_survives_restart() {
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(ScriptedLauncher::new());
        let config = InstanceConfig::new(Role::Embedder, Backend::Ollama, "nomic-embed-text");
        {
            let orchestrator =
                Orchestrator::with_launcher(settings(&dir), launcher.clone(), linux_box()).unwrap();
            orchestrator.add_instance(config.clone()).await.unwrap();
            orchestrator.shutdown().await;
        }

        let orchestrator =
            Orchestrator::with_launcher(settings(&dir), launcher, linux_box()).unwrap();
        assert_eq!(orchestrator.instance(config.id).await, Some(config));
        assert_eq!(orchestrator.instances().await.len(), 3);
    }

    #[tokio::test]
    async fn test_multiple_orchestrators_coexist() {
        let a = harness();
        let b = harness();
        a.orchestrator.start_all().await;
        assert_eq!(a.launcher.live(), 2);
        assert_eq!(b.launcher.live(), 0);
    }

    #[tokio::test]
    async fn test_discovery_publishes_results() {
        let dir = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        std::fs::create_dir_all(cache.path().join("models--org--Coder-7B")).unwrap();

        let mut settings = settings(&dir);
        settings.cache_roots = Some(vec![crate::discovery::CacheRoot::new(
            crate::discovery::CacheKind::HubCache,
            cache.path(),
        )]);
        let orchestrator =
            Orchestrator::with_launcher(settings, Arc::new(ScriptedLauncher::new()), linux_box())
                .unwrap();
        let mut events = orchestrator.subscribe();

        let models = orchestrator.discover_installed_models().await;
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "org/Coder-7B");
        assert_eq!(
            events.recv().await.unwrap(),
            OrchestratorEvent::DiscoveredModelsChanged(1)
        );
        assert_eq!(orchestrator.discovered_models().await, models);

        // Short queries never reach the hub
        assert!(orchestrator.search_models("co", Backend::LlamaCpp).await.is_empty());
    }

    #[tokio::test]
    async fn test_background_discovery_after_drop_is_silent() {
        let h = harness();
        let task = h.orchestrator.discover_in_background();
        drop(h);
        assert!(task.await.is_ok());
    }
}

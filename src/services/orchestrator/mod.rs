//! Workload orchestrator
//!
//! Clones a workload's repository, builds and runs it as a container, and
//! supervises the container until it exits or is stopped.
//!
//! pending → starting-container → cloning-repo → starting-service → running,
//! any stage → failed, running → graceful-shutdown → stopped.
//!
//! Whoever removes a `RunningWorkload` from the running map (the monitor or
//! `stop`) owns its cleanup, so cleanup and port release happen once.

pub mod scaffold;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::env::constants::{
    MONITOR_INTERVAL_SECS, SERVICE_INTERNAL_PORT, STARTUP_GRACE_SECS,
};
use crate::config::EnvConfig;
use crate::domain::{
    BuildOptions, BusEvent, ContainerConfig, LogLine, Workload, WorkloadPhase, WorkloadStatus,
};
use crate::infra::docker::{
    monitor, ContainerRuntime, MonitorExit, MonitorHandle, ProgressFn, RuntimeError,
};
use crate::infra::git::{CloneError, SourceFetcher};
use crate::services::lifecycle::ContainerLifecycle;
use crate::state::event_bus::EventBus;
use crate::state::log_hub::LogHub;
use crate::state::port_pool::{PortPool, PortPoolError};
use crate::state::store::{StoreError, WorkloadStore};

use scaffold::MANIFEST_FILE;

/// Service subdirectory used when the workload does not name one
pub const DEFAULT_SERVICE_DIR: &str = "service";

/// Lines kept in memory per workload; older lines remain in the stored record
const LOG_BUFFER_LINES: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Workload {0} not found")]
    WorkloadNotFound(String),
    #[error("Workload {0} is not running")]
    NotRunning(String),
    #[error("Workload {0} is already running")]
    AlreadyRunning(String),
    #[error("Failed to clone repository: {0}")]
    Clone(#[from] CloneError),
    #[error("Service directory '{0}' not found in repository")]
    MissingServiceDir(String),
    #[error("Service manifest '{0}' not found")]
    MissingManifest(String),
    #[error(transparent)]
    Ports(#[from] PortPoolError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Timing and filesystem settings
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Parent of the per-start work directories
    pub work_root: PathBuf,
    pub monitor_interval: Duration,
    /// Wait after the container starts before reporting it running
    pub startup_grace: Duration,
    /// Port the service listens on inside the container
    pub internal_port: u16,
    pub public_host: String,
}

impl OrchestratorSettings {
    pub fn from_config(config: &EnvConfig) -> Self {
        Self {
            work_root: config.work_root.clone(),
            public_host: config.public_host.clone(),
            ..Self::default()
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            work_root: std::env::temp_dir().join("module-deploy-agent"),
            monitor_interval: Duration::from_secs(MONITOR_INTERVAL_SECS),
            startup_grace: Duration::from_secs(STARTUP_GRACE_SECS),
            internal_port: SERVICE_INTERNAL_PORT,
            public_host: "localhost".to_string(),
        }
    }
}

/// In-memory state of a started workload
pub struct RunningWorkload {
    pub workload_id: String,
    pub container_id: String,
    pub image: String,
    pub port: u16,
    pub work_dir: PathBuf,
    pub phase: WorkloadPhase,
    pub started_at: DateTime<Utc>,
    /// Orchestrator lines and live container output, oldest first
    pub logs: Vec<String>,
    /// Initial output already logged, replayed again by the live stream
    replayed: usize,
    monitor: Option<MonitorHandle>,
    log_stream: CancellationToken,
}

impl RunningWorkload {
    fn snapshot(&self, public_host: &str) -> WorkloadSnapshot {
        WorkloadSnapshot {
            workload_id: self.workload_id.clone(),
            stage: self.phase.as_str().to_string(),
            status: self.phase.status(),
            running: true,
            port: Some(self.port),
            container_id: Some(self.container_id.clone()),
            url: Some(format!("http://{}:{}", public_host, self.port)),
            error: None,
        }
    }
}

enum Slot {
    /// Log lines buffered until the workload is running
    Starting(Vec<String>),
    Running(RunningWorkload),
}

impl Slot {
    fn push_log(&mut self, line: String) {
        let logs = match self {
            Slot::Starting(logs) => logs,
            Slot::Running(running) => &mut running.logs,
        };
        logs.push(line);
        if logs.len() > LOG_BUFFER_LINES {
            let excess = logs.len() - LOG_BUFFER_LINES;
            logs.drain(..excess);
        }
    }
}

/// Status view returned by `start` and `get_status`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSnapshot {
    pub workload_id: String,
    pub stage: String,
    pub status: WorkloadStatus,
    pub running: bool,
    pub port: Option<u16>,
    pub container_id: Option<String>,
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkloadSnapshot {
    fn from_record(workload: &Workload) -> Self {
        Self {
            workload_id: workload.id.clone(),
            stage: workload.current_stage.clone(),
            status: workload.status,
            running: false,
            port: workload.artifacts.port,
            container_id: workload.artifacts.container_id.clone(),
            url: workload.artifacts.url.clone(),
            error: workload.error.clone(),
        }
    }
}

/// Resources acquired so far by a `start`, released if it fails
#[derive(Default)]
struct Acquired {
    work_dir: Option<PathBuf>,
    port: Option<u16>,
    image: Option<String>,
    container_id: Option<String>,
}

#[derive(Clone)]
pub struct WorkloadOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    lifecycle: ContainerLifecycle,
    fetcher: Arc<dyn SourceFetcher>,
    store: Arc<dyn WorkloadStore>,
    ports: Arc<PortPool>,
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    log_hub: Arc<LogHub>,
    bus: Option<Arc<EventBus>>,
    settings: Arc<OrchestratorSettings>,
}

impl WorkloadOrchestrator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        fetcher: Arc<dyn SourceFetcher>,
        store: Arc<dyn WorkloadStore>,
        ports: Arc<PortPool>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            lifecycle: ContainerLifecycle::new(runtime.clone()),
            runtime,
            fetcher,
            store,
            ports,
            slots: Arc::new(Mutex::new(HashMap::new())),
            log_hub: Arc::new(LogHub::new()),
            bus: None,
            settings: Arc::new(settings),
        }
    }

    pub fn with_log_hub(mut self, log_hub: Arc<LogHub>) -> Self {
        self.log_hub = log_hub;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn ports(&self) -> &PortPool {
        &self.ports
    }

    /// Clone, build and run a workload
    pub async fn start(
        &self,
        workload_id: &str,
        repo_url: &str,
    ) -> Result<WorkloadSnapshot, OrchestratorError> {
        let workload = self
            .store
            .find_workload(workload_id)
            .await?
            .ok_or_else(|| OrchestratorError::WorkloadNotFound(workload_id.to_string()))?;

        {
            let mut slots = self.slots.lock().await;
            if slots.contains_key(workload_id) {
                return Err(OrchestratorError::AlreadyRunning(workload_id.to_string()));
            }
            slots.insert(workload_id.to_string(), Slot::Starting(Vec::new()));
        }
        self.log_hub.create(workload_id).await;
        info!(workload_id, repo_url, "Starting workload");

        let mut acquired = Acquired::default();
        match self.launch(&workload, repo_url, &mut acquired).await {
            Ok(running) => Ok(self.activate(running).await),
            Err(e) => {
                self.abort_start(workload_id, acquired, &e).await;
                Err(e)
            }
        }
    }

    async fn launch(
        &self,
        workload: &Workload,
        repo_url: &str,
        acquired: &mut Acquired,
    ) -> Result<RunningWorkload, OrchestratorError> {
        let id = workload.id.as_str();
        let internal_port = self.settings.internal_port;

        self.enter_phase(id, WorkloadPhase::StartingContainer).await?;
        let work_dir = self
            .settings
            .work_root
            .join(format!("{}-{}", slug(id), uuid::Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&work_dir).await?;
        acquired.work_dir = Some(work_dir.clone());
        self.append_log(id, LogLine::info(format!("Work directory: {}", work_dir.display())))
            .await;

        self.enter_phase(id, WorkloadPhase::CloningRepo).await?;
        let repo_dir = work_dir.join("repo");
        self.append_log(id, LogLine::info(format!("Cloning {}", repo_url)))
            .await;
        self.fetcher.clone_repo(repo_url, &repo_dir).await?;

        let service_dir_name = workload
            .service_dir
            .as_deref()
            .unwrap_or(DEFAULT_SERVICE_DIR);
        let service_dir = repo_dir.join(service_dir_name);
        if !is_dir(&service_dir).await {
            return Err(OrchestratorError::MissingServiceDir(service_dir_name.to_string()));
        }
        if !is_file(&service_dir.join(MANIFEST_FILE)).await {
            return Err(OrchestratorError::MissingManifest(format!(
                "{}/{}",
                service_dir_name, MANIFEST_FILE
            )));
        }

        self.enter_phase(id, WorkloadPhase::StartingService).await?;
        let port = self.ports.acquire()?;
        acquired.port = Some(port);
        self.modify(id, move |w| w.artifacts.port = Some(port)).await?;
        self.append_log(id, LogLine::info(format!("Assigned port {}", port)))
            .await;

        let resource = scaffold::sanitize_resource(workload.resource.as_deref());
        let prepared = scaffold::prepare_service(&service_dir, &resource, internal_port).await?;
        if prepared.scaffolded {
            self.append_log(
                id,
                LogLine::warn(format!(
                    "No entry file in {}, generated an in-memory '{}' module",
                    MANIFEST_FILE, resource
                )),
            )
            .await;
        }

        let image = format!("workload-{}", slug(id));
        self.append_log(id, LogLine::info(format!("Building image {}", image)))
            .await;
        let on_progress: &ProgressFn<'_> =
            &|line: &str| debug!(workload_id = %id, "{}", line);
        self.runtime
            .build_image(&service_dir, &BuildOptions::new(image.clone()), Some(on_progress))
            .await?;
        acquired.image = Some(image.clone());

        match self.runtime.remove(&image, true).await {
            Ok(()) => {
                self.append_log(id, LogLine::info(format!("Removed stale container {}", image)))
                    .await
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                self.append_log(id, LogLine::warn(format!("Could not remove stale container: {}", e)))
                    .await
            }
        }

        let config = ContainerConfig::new(image.clone())
            .with_name(image.clone())
            .with_port(port, internal_port)
            .with_env(vec![format!("PORT={}", internal_port)])
            .with_label("workload.id", id);
        let container_id = self.lifecycle.create(&config).await?;
        acquired.container_id = Some(container_id.clone());
        self.lifecycle.start(&container_id).await?;
        self.append_log(id, LogLine::info(format!("Container {} started", container_id)))
            .await;

        let mut replayed = 0;
        match self.runtime.logs(&container_id).await {
            Ok(output) => {
                for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
                    replayed += 1;
                    self.append_log(id, LogLine::info(format!("[container] {}", line)))
                        .await;
                }
            }
            Err(e) => {
                self.append_log(id, LogLine::warn(format!("Could not read container output: {}", e)))
                    .await
            }
        }

        tokio::time::sleep(self.settings.startup_grace).await;

        Ok(RunningWorkload {
            workload_id: id.to_string(),
            container_id,
            image,
            port,
            work_dir,
            phase: WorkloadPhase::Running,
            started_at: Utc::now(),
            logs: Vec::new(),
            replayed,
            monitor: None,
            log_stream: CancellationToken::new(),
        })
    }

    /// Record the running state, then begin log streaming and monitoring
    ///
    /// Holds the running map lock until the slot is registered.
    async fn activate(&self, mut running: RunningWorkload) -> WorkloadSnapshot {
        let id = running.workload_id.clone();
        let port = running.port;
        let url = format!("http://{}:{}", self.settings.public_host, port);
        let mut slots = self.slots.lock().await;
        if let Some(Slot::Starting(logs)) = slots.remove(&id) {
            running.logs = logs;
        }

        let container_id = running.container_id.clone();
        let image = running.image.clone();
        let persisted = self
            .modify(&id, move |w| {
                w.artifacts.container_id = Some(container_id);
                w.artifacts.container_name = Some(image.clone());
                w.artifacts.image_name = Some(image);
                w.artifacts.url = Some(url);
                w.current_stage = WorkloadPhase::Running.as_str().to_string();
                w.status = WorkloadStatus::Running;
                w.error = None;
            })
            .await;
        if let Err(e) = persisted {
            warn!(workload_id = %id, error = %e, "Failed to persist running state");
        }

        self.spawn_log_stream(&running);

        let this = self.clone();
        let exit_id = id.clone();
        running.monitor = Some(monitor(
            self.runtime.clone(),
            running.container_id.clone(),
            self.settings.monitor_interval,
            move |exit| async move { this.handle_exit(&exit_id, exit).await },
        ));
        let snapshot = running.snapshot(&self.settings.public_host);
        slots.insert(id.clone(), Slot::Running(running));
        drop(slots);

        self.append_log(&id, LogLine::info(format!("Workload running on port {}", port)))
            .await;
        snapshot
    }

    /// Forward the container's live output into the log buffer and hub
    fn spawn_log_stream(&self, running: &RunningWorkload) {
        let runtime = self.runtime.clone();
        let hub = self.log_hub.clone();
        let slots = self.slots.clone();
        let token = running.log_stream.clone();
        let container_id = running.container_id.clone();
        let workload_id = running.workload_id.clone();
        let mut replayed = running.replayed;

        tokio::spawn(async move {
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();
            let stream = async {
                let mut on_line = move |line: String| {
                    let _ = tx.send(line);
                };
                runtime.stream_logs(&container_id, &mut on_line, &token).await
            };
            let forward = async {
                while let Some(line) = rx.recv().await {
                    // the engine replays from the start; skip what launch already logged
                    if replayed > 0 {
                        replayed -= 1;
                        continue;
                    }
                    let line = LogLine::info(format!("[container] {}", line));
                    if let Some(slot) = slots.lock().await.get_mut(&workload_id) {
                        slot.push_log(line.render());
                    }
                    hub.publish(&workload_id, line).await;
                }
            };
            let (result, ()) = tokio::join!(stream, forward);
            if let Err(e) = result {
                warn!(workload_id = %workload_id, error = %e, "Live log stream failed");
                let notice = LogLine::warn(format!("Live container output unavailable: {}", e));
                if let Some(slot) = slots.lock().await.get_mut(&workload_id) {
                    slot.push_log(notice.render());
                }
                hub.publish(&workload_id, notice).await;
            }
        });
    }

    /// Monitor callback: the container is no longer running
    async fn handle_exit(&self, workload_id: &str, exit: MonitorExit) {
        let running = {
            let mut slots = self.slots.lock().await;
            match slots.remove(workload_id) {
                Some(Slot::Running(running)) => running,
                Some(other) => {
                    slots.insert(workload_id.to_string(), other);
                    return;
                }
                None => return,
            }
        };
        running.log_stream.cancel();

        let (phase, line, error) = match &exit {
            MonitorExit::Exited(state) if !state.has_failed() => (
                WorkloadPhase::Stopped,
                LogLine::info("Container exited with code 0"),
                None,
            ),
            MonitorExit::Exited(state) => {
                let mut message = format!("Container exited with code {}", state.exit_code);
                if !state.error.is_empty() {
                    message.push_str(&format!(": {}", state.error));
                }
                (WorkloadPhase::Failed, LogLine::error(message.clone()), Some(message))
            }
            MonitorExit::InspectFailed(e) => {
                let message = format!("Container inspection failed: {}", e);
                (WorkloadPhase::Failed, LogLine::error(message.clone()), Some(message))
            }
        };

        self.ports.release(running.port);
        self.append_log(workload_id, line).await;
        self.teardown(&running).await;
        self.finalize(workload_id, phase, error).await;
    }

    /// Stop a running workload and release everything it holds
    pub async fn stop(&self, workload_id: &str) -> Result<(), OrchestratorError> {
        let running = {
            let mut slots = self.slots.lock().await;
            match slots.remove(workload_id) {
                Some(Slot::Running(running)) => running,
                Some(starting) => {
                    slots.insert(workload_id.to_string(), starting);
                    return Err(OrchestratorError::NotRunning(workload_id.to_string()));
                }
                None => return Err(OrchestratorError::NotRunning(workload_id.to_string())),
            }
        };

        if let Some(handle) = &running.monitor {
            handle.cancel();
        }
        running.log_stream.cancel();

        if let Err(e) = self
            .enter_phase(workload_id, WorkloadPhase::GracefulShutdown)
            .await
        {
            warn!(workload_id, error = %e, "Failed to record graceful shutdown");
        }
        match self.lifecycle.stop(&running.container_id, true).await {
            Ok(warnings) => {
                for warning in warnings {
                    self.append_log(workload_id, LogLine::warn(warning)).await;
                }
            }
            Err(e) => {
                self.append_log(workload_id, LogLine::warn(format!("Stop failed: {}", e)))
                    .await
            }
        }

        self.teardown(&running).await;
        self.ports.release(running.port);
        self.finalize(workload_id, WorkloadPhase::Stopped, None).await;
        info!(workload_id, "Workload stopped");
        Ok(())
    }

    /// Stop every running workload
    pub async fn stop_all(&self) {
        let ids: Vec<String> = {
            let slots = self.slots.lock().await;
            slots
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Running(_)))
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in ids {
            if let Err(e) = self.stop(&id).await {
                warn!(workload_id = %id, error = %e, "Failed to stop workload");
            }
        }
    }

    pub async fn get_status(&self, workload_id: &str) -> Result<WorkloadSnapshot, OrchestratorError> {
        if let Some(Slot::Running(running)) = self.slots.lock().await.get(workload_id) {
            return Ok(running.snapshot(&self.settings.public_host));
        }
        let workload = self
            .store
            .find_workload(workload_id)
            .await?
            .ok_or_else(|| OrchestratorError::WorkloadNotFound(workload_id.to_string()))?;
        Ok(WorkloadSnapshot::from_record(&workload))
    }

    /// The in-memory buffer while running, otherwise the stored log
    pub async fn get_logs(&self, workload_id: &str) -> Result<Vec<String>, OrchestratorError> {
        if let Some(Slot::Running(running)) = self.slots.lock().await.get(workload_id) {
            return Ok(running.logs.clone());
        }
        let workload = self
            .store
            .find_workload(workload_id)
            .await?
            .ok_or_else(|| OrchestratorError::WorkloadNotFound(workload_id.to_string()))?;
        Ok(workload.logs)
    }

    pub async fn running_count(&self) -> usize {
        self.slots
            .lock()
            .await
            .values()
            .filter(|slot| matches!(slot, Slot::Running(_)))
            .count()
    }

    /// Undo a failed start
    async fn abort_start(&self, workload_id: &str, acquired: Acquired, cause: &OrchestratorError) {
        error!(workload_id, error = %cause, "Workload start failed");
        self.append_log(workload_id, LogLine::error(format!("Start failed: {}", cause)))
            .await;

        if let Some(container_id) = &acquired.container_id {
            if let Err(e) = self.lifecycle.cleanup(container_id).await {
                warn!(workload_id, error = %e, "Failed to remove container");
            }
        }
        if let Some(image) = &acquired.image {
            if let Err(e) = self.runtime.remove_image(image, true).await {
                debug!(workload_id, error = %e, "Image removal skipped");
            }
        }
        if let Some(port) = acquired.port {
            self.ports.release(port);
        }
        if let Some(work_dir) = &acquired.work_dir {
            remove_work_dir(work_dir).await;
        }

        self.slots.lock().await.remove(workload_id);
        self.finalize(workload_id, WorkloadPhase::Failed, Some(cause.to_string()))
            .await;
    }

    /// Remove the container, image and work directory
    async fn teardown(&self, running: &RunningWorkload) {
        let id = running.workload_id.as_str();
        match self.lifecycle.cleanup(&running.container_id).await {
            Ok(report) => {
                for warning in report.warnings {
                    debug!(workload_id = %id, "{}", warning);
                }
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                self.append_log(id, LogLine::warn(format!("Container cleanup failed: {}", e)))
                    .await
            }
        }
        if let Err(e) = self.runtime.remove_image(&running.image, true).await {
            debug!(workload_id = %id, error = %e, "Image removal skipped");
        }
        remove_work_dir(&running.work_dir).await;
    }

    async fn finalize(&self, workload_id: &str, phase: WorkloadPhase, error: Option<String>) {
        let result = self
            .modify(workload_id, move |w| {
                w.current_stage = phase.as_str().to_string();
                w.error = error;
                w.complete(phase.status());
            })
            .await;
        if let Err(e) = result {
            warn!(workload_id, error = %e, "Failed to persist final state");
        }
        self.log_hub.finish(workload_id).await;
    }

    async fn enter_phase(&self, workload_id: &str, phase: WorkloadPhase) -> Result<(), OrchestratorError> {
        self.modify(workload_id, move |w| {
            w.current_stage = phase.as_str().to_string();
            w.status = phase.status();
        })
        .await?;
        if let Some(Slot::Running(running)) = self.slots.lock().await.get_mut(workload_id) {
            running.phase = phase;
        }
        self.append_log(workload_id, LogLine::info(format!("Stage: {}", phase.as_str())))
            .await;
        Ok(())
    }

    /// Read-modify-write of the stored record, announced on the bus
    async fn modify<F>(&self, workload_id: &str, change: F) -> Result<Workload, OrchestratorError>
    where
        F: FnOnce(&mut Workload) + Send,
    {
        let mut workload = self
            .store
            .find_workload(workload_id)
            .await?
            .ok_or_else(|| OrchestratorError::WorkloadNotFound(workload_id.to_string()))?;
        change(&mut workload);
        workload.touch();
        self.store.update_workload(&workload).await?;
        if let Some(bus) = &self.bus {
            bus.publish(&BusEvent::workload_update(&workload));
        }
        Ok(workload)
    }

    /// Log to tracing and the log hub, and append to the stored record
    async fn append_log(&self, workload_id: &str, line: LogLine) {
        match line.level.as_str() {
            "error" => error!(workload_id, "{}", line.content),
            "warn" => warn!(workload_id, "{}", line.content),
            _ => info!(workload_id, "{}", line.content),
        }
        let rendered = line.render();
        if let Some(slot) = self.slots.lock().await.get_mut(workload_id) {
            slot.push_log(rendered.clone());
        }
        self.log_hub.publish(workload_id, line).await;

        if let Err(e) = self.push_log(workload_id, rendered).await {
            warn!(workload_id, error = %e, "Failed to persist log line");
        }
    }

    // TODO: replace fetch-push-update with a store-level append once WorkloadStore grows one
    async fn push_log(&self, workload_id: &str, rendered: String) -> Result<(), StoreError> {
        let mut workload = self
            .store
            .find_workload(workload_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "workload",
                id: workload_id.to_string(),
            })?;
        workload.logs.push(rendered);
        self.store.update_workload(&workload).await
    }
}

fn slug(id: &str) -> String {
    id.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn remove_work_dir(path: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove work directory");
        }
    }
}

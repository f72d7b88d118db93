//! Stage pipeline
//!
//! Runs a module through validate → build → deploy → healthcheck → test →
//! complete. A run never returns an error: every failure ends up in the
//! returned `Workload`.

pub mod context;
pub mod http_check;
mod stages;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::domain::{
    BusEvent, DeployEvent, DeploymentTarget, ModuleDefinition, StageResult, Workload,
    WorkloadStatus,
};
use crate::infra::docker::{ContainerRuntime, RuntimeError};
use crate::services::lifecycle::{ContainerLifecycle, LifecycleError};
use crate::services::registry::{HandlerRegistry, ModuleHandler};
use crate::state::event_bus::EventBus;
use crate::state::store::{StoreError, WorkloadStore};

pub use context::StageContext;

/// Stage names in execution order
pub const STAGES: [&str; 6] = ["validate", "build", "deploy", "healthcheck", "test", "complete"];

/// Reasons a stage fails
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("{0}")]
    Validation(String),
    #[error("Unsupported target type: {0}")]
    UnsupportedTarget(String),
    #[error("Healthcheck failed after all retries")]
    HealthcheckExhausted,
    #[error("{failed} test(s) failed: {details}")]
    TestsFailed { failed: usize, details: String },
    #[error("Missing artifact: {0}")]
    MissingArtifact(&'static str),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pipeline runner
pub struct Deployer {
    registry: Arc<HandlerRegistry>,
    lifecycle: ContainerLifecycle,
    http: reqwest::Client,
    public_host: String,
    store: Option<Arc<dyn WorkloadStore>>,
    bus: Option<Arc<EventBus>>,
}

impl Deployer {
    pub fn new(registry: Arc<HandlerRegistry>, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let http = reqwest::Client::builder()
            .no_proxy()
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            registry,
            lifecycle: ContainerLifecycle::new(runtime),
            http,
            public_host: "localhost".to_string(),
            store: None,
            bus: None,
        }
    }

    /// Host used in the workload URL
    pub fn with_public_host(mut self, host: impl Into<String>) -> Self {
        self.public_host = host.into();
        self
    }

    pub fn with_store(mut self, store: Arc<dyn WorkloadStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Run the pipeline for a new workload
    pub async fn deploy_workload(
        &self,
        module: &ModuleDefinition,
        target: &DeploymentTarget,
        deployment_id: &str,
        events: Option<&mpsc::UnboundedSender<DeployEvent>>,
    ) -> Workload {
        let workload = Workload::for_module(
            uuid::Uuid::new_v4().to_string(),
            deployment_id.to_string(),
            module,
            target,
        );
        self.run(workload, module, target, events).await
    }

    /// Run the pipeline for a workload record created by the caller
    pub async fn run(
        &self,
        mut workload: Workload,
        module: &ModuleDefinition,
        target: &DeploymentTarget,
        events: Option<&mpsc::UnboundedSender<DeployEvent>>,
    ) -> Workload {
        let workload_id = workload.id.clone();
        info!(
            workload_id = %workload_id,
            module = %module.id,
            module_type = %module.module_type,
            target = %target.target_type,
            "Starting pipeline"
        );

        let Some(handler) = self.registry.get(&module.module_type) else {
            let message = format!("Unknown module type: {}", module.module_type);
            warn!(workload_id = %workload_id, "{}", message);
            workload.current_stage = "validate".to_string();
            workload.error = Some(message);
            workload.complete(WorkloadStatus::Failed);
            self.finish(&workload, events).await;
            return workload;
        };

        workload.status = WorkloadStatus::Running;
        self.persist(&workload).await;

        for stage in STAGES {
            send(
                events,
                DeployEvent::StageStart {
                    workload_id: workload_id.clone(),
                    stage: stage.to_string(),
                },
            );

            let ctx = StageContext::new(
                &workload_id,
                stage,
                &self.lifecycle,
                &self.public_host,
                &self.http,
                events,
            );
            let started_at = Utc::now();
            let outcome = self
                .execute(stage, handler.as_ref(), module, target, &mut workload, &ctx)
                .await;
            if let Err(e) = &outcome {
                ctx.error(&e.to_string());
            }
            let result = StageResult::finish(
                stage,
                started_at,
                ctx.take_logs(),
                outcome.err().map(|e| e.to_string()),
            );

            let failed = result.is_failed();
            workload.push_stage(result.clone());
            send(
                events,
                DeployEvent::StageComplete {
                    workload_id: workload_id.clone(),
                    stage: stage.to_string(),
                    result,
                },
            );
            self.persist(&workload).await;

            if failed {
                warn!(workload_id = %workload_id, stage, error = ?workload.error, "Stage failed");
                break;
            }
        }

        let status = if workload.has_failed_stage() {
            WorkloadStatus::Failed
        } else {
            WorkloadStatus::Success
        };
        workload.complete(status);
        info!(workload_id = %workload_id, status = status.as_str(), "Pipeline finished");
        self.finish(&workload, events).await;
        workload
    }

    async fn execute(
        &self,
        stage: &str,
        handler: &dyn ModuleHandler,
        module: &ModuleDefinition,
        target: &DeploymentTarget,
        workload: &mut Workload,
        ctx: &StageContext<'_>,
    ) -> Result<(), StageError> {
        match stage {
            "validate" => stages::validate(handler, module, ctx),
            "build" => stages::build(handler, module, &mut workload.artifacts, ctx).await,
            "deploy" => stages::deploy(handler, module, target, &mut workload.artifacts, ctx).await,
            "healthcheck" => stages::healthcheck(module, &workload.artifacts, ctx).await,
            "test" => stages::test(handler, module, &workload.artifacts, ctx).await,
            _ => {
                stages::complete(module, &workload.artifacts, ctx);
                Ok(())
            }
        }
    }

    async fn finish(&self, workload: &Workload, events: Option<&mpsc::UnboundedSender<DeployEvent>>) {
        send(
            events,
            DeployEvent::WorkloadComplete {
                workload_id: workload.id.clone(),
                status: workload.status,
                error: workload.error.clone(),
            },
        );
        self.persist(workload).await;
    }

    /// Store the record (insert on first write) and announce it on the bus
    async fn persist(&self, workload: &Workload) {
        if let Some(store) = &self.store {
            let result = match store.update_workload(workload).await {
                Err(StoreError::NotFound { .. }) => store.insert_workload(workload.clone()).await,
                other => other,
            };
            if let Err(e) = result {
                warn!(workload_id = %workload.id, error = %e, "Failed to persist workload");
            }
        }
        if let Some(bus) = &self.bus {
            bus.publish(&BusEvent::workload_update(workload));
        }
    }
}

fn send(events: Option<&mpsc::UnboundedSender<DeployEvent>>, event: DeployEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Artifacts, ContainerConfig, HealthcheckConfig, HttpTestConfig, RuntimeConfig, StageStatus,
        TestDefinition, ValidationResult,
    };
    use crate::services::registry::api_resource::API_RESOURCE_TYPE;
    use crate::state::store::MemoryStore;
    use crate::testing::FakeRuntime;
    use async_trait::async_trait;
    use axum::{http::StatusCode, routing::get, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn spawn_server(router: Router) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        port
    }

    fn healthy_service() -> Router {
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route(
                "/tasks",
                get(|| async { "[]" })
                    .post(|| async { (StatusCode::BAD_REQUEST, "title is required") }),
            )
    }

    fn module(module_type: &str) -> ModuleDefinition {
        ModuleDefinition {
            id: "todo-api".to_string(),
            name: "todo".to_string(),
            version: "1.0.0".to_string(),
            module_type: module_type.to_string(),
            source_dir: Some("/nonexistent/todo-api".to_string()),
            config: serde_json::json!({ "resources": ["tasks"] }),
            runtime: RuntimeConfig {
                port: Some(3000),
                env: [("NODE_ENV".to_string(), "test".to_string())].into(),
                healthcheck: Some(HealthcheckConfig {
                    path: Some("/health".to_string()),
                    interval: Some(10),
                    timeout: Some(1000),
                    retries: Some(3),
                }),
            },
        }
    }

    fn deployer(fake: &Arc<FakeRuntime>, registry: HandlerRegistry) -> Deployer {
        Deployer::new(Arc::new(registry), fake.clone()).with_public_host("127.0.0.1")
    }

    /// Handler with a fixed list of tests
    struct FixedTests(Vec<TestDefinition>);

    #[async_trait]
    impl ModuleHandler for FixedTests {
        fn module_type(&self) -> &str {
            "fixed"
        }

        fn validate(&self, _module: &ModuleDefinition) -> ValidationResult {
            ValidationResult::from_parts(Vec::new(), vec!["fixture handler".to_string()])
        }

        fn get_tests(&self, _module: &ModuleDefinition, _artifacts: &Artifacts) -> Vec<TestDefinition> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_unknown_module_type_short_circuits() {
        let fake = Arc::new(FakeRuntime::new());
        let deployer = deployer(&fake, HandlerRegistry::with_defaults());

        let workload = deployer
            .deploy_workload(
                &module("mystery"),
                &DeploymentTarget::docker_local(None),
                "dep-1",
                None,
            )
            .await;

        assert_eq!(workload.status, WorkloadStatus::Failed);
        assert_eq!(workload.current_stage, "validate");
        assert_eq!(workload.error.as_deref(), Some("Unknown module type: mystery"));
        assert!(workload.stages.is_empty());
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_full_success_runs_every_stage() {
        let port = spawn_server(healthy_service()).await;
        let fake = Arc::new(FakeRuntime::new());
        let deployer = deployer(&fake, HandlerRegistry::with_defaults());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let workload = deployer
            .deploy_workload(
                &module(API_RESOURCE_TYPE),
                &DeploymentTarget::docker_local(Some(port)),
                "dep-1",
                Some(&tx),
            )
            .await;

        assert_eq!(workload.status, WorkloadStatus::Success, "{:?}", workload.error);
        let names: Vec<&str> = workload.stages.iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(names, STAGES.to_vec());
        assert_eq!(workload.current_stage, "complete");
        assert!(workload.completed_at.is_some());
        assert_eq!(workload.artifacts.image_name.as_deref(), Some("todo:1.0.0"));
        assert_eq!(workload.artifacts.port, Some(port));
        assert_eq!(
            workload.artifacts.url.as_deref(),
            Some(format!("http://127.0.0.1:{}", port).as_str())
        );

        let created = fake.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].name.as_deref(), Some("module-todo-api"));
        assert_eq!(created[0].env, vec!["NODE_ENV=test".to_string()]);
        assert_eq!(created[0].ports[0].host_port, port);
        assert_eq!(created[0].ports[0].container_port, 3000);

        drop(tx);
        let mut starts = 0;
        let mut last = None;
        while let Some(event) = rx.recv().await {
            if matches!(event, DeployEvent::StageStart { .. }) {
                starts += 1;
            }
            last = Some(event);
        }
        assert_eq!(starts, 6);
        assert!(matches!(
            last,
            Some(DeployEvent::WorkloadComplete {
                status: WorkloadStatus::Success,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_healthcheck_exhaustion_fails_workload() {
        let router = Router::new().route(
            "/health",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "starting") }),
        );
        let port = spawn_server(router).await;
        let fake = Arc::new(FakeRuntime::new());
        let deployer = deployer(&fake, HandlerRegistry::with_defaults());

        let workload = deployer
            .deploy_workload(
                &module(API_RESOURCE_TYPE),
                &DeploymentTarget::docker_local(Some(port)),
                "dep-1",
                None,
            )
            .await;

        assert_eq!(workload.status, WorkloadStatus::Failed);
        let last = workload.stages.last().unwrap();
        assert_eq!(last.stage, "healthcheck");
        assert_eq!(last.error.as_deref(), Some("Healthcheck failed after all retries"));
        assert_eq!(workload.error.as_deref(), Some("Healthcheck failed after all retries"));
        assert_eq!(workload.stages.len(), 4);
    }

    #[tokio::test]
    async fn test_failing_tests_are_named_exactly() {
        let port = spawn_server(healthy_service()).await;
        let ok = |name: &str| {
            TestDefinition::http(name, HttpTestConfig::new("GET", "/tasks").expect_status(200))
        };
        let tests = vec![
            ok("alpha"),
            TestDefinition::http(
                "bravo",
                HttpTestConfig::new("GET", "/tasks").expect_status(201),
            ),
            ok("charlie"),
            TestDefinition::http(
                "delta",
                HttpTestConfig::new("GET", "/health").expect_body_contains("healthy"),
            ),
            ok("echo"),
        ];
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(FixedTests(tests)));
        let fake = Arc::new(FakeRuntime::new());
        let deployer = deployer(&fake, registry);

        let workload = deployer
            .deploy_workload(
                &module("fixed"),
                &DeploymentTarget::docker_local(Some(port)),
                "dep-1",
                None,
            )
            .await;

        assert_eq!(workload.status, WorkloadStatus::Failed);
        let by_name = |name: &str| workload.stages.iter().find(|s| s.stage == name).unwrap();
        assert_eq!(by_name("deploy").status, StageStatus::Success);
        assert_eq!(by_name("healthcheck").status, StageStatus::Success);

        let test_stage = by_name("test");
        assert_eq!(test_stage.status, StageStatus::Failed);
        let error = test_stage.error.clone().unwrap();
        assert!(error.starts_with("2 test(s) failed: "), "{}", error);
        assert!(error.contains("bravo (expected status 201, got 200)"));
        assert!(error.contains("delta ("));
        for passing in ["alpha", "charlie", "echo"] {
            assert!(!error.contains(passing));
        }
        assert_eq!(workload.stages.len(), 5);
    }

    #[tokio::test]
    async fn test_non_http_tests_are_skipped() {
        let port = spawn_server(healthy_service()).await;
        let mut shell = TestDefinition::http("shell", HttpTestConfig::new("GET", "/"));
        shell.test_type = "shell".to_string();
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(FixedTests(vec![shell])));
        let fake = Arc::new(FakeRuntime::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let workload = deployer(&fake, registry)
            .deploy_workload(
                &module("fixed"),
                &DeploymentTarget::docker_local(Some(port)),
                "dep-1",
                Some(&tx),
            )
            .await;
        drop(tx);

        assert_eq!(workload.status, WorkloadStatus::Success);
        let mut skipped = false;
        while let Some(event) = rx.recv().await {
            if let DeployEvent::TestComplete { skipped: true, .. } = event {
                skipped = true;
            }
        }
        assert!(skipped);
    }

    #[tokio::test]
    async fn test_unsupported_target_makes_no_engine_calls() {
        let fake = Arc::new(FakeRuntime::new());
        let deployer = deployer(&fake, HandlerRegistry::with_defaults());
        let target = DeploymentTarget {
            target_type: "kubernetes".to_string(),
            config: serde_json::json!({}),
        };

        let workload = deployer
            .deploy_workload(&module(API_RESOURCE_TYPE), &target, "dep-1", None)
            .await;

        assert_eq!(workload.status, WorkloadStatus::Failed);
        assert_eq!(workload.current_stage, "deploy");
        assert_eq!(
            workload.error.as_deref(),
            Some("Unsupported target type: kubernetes")
        );
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_runtime_error_becomes_failed_stage() {
        let fake = Arc::new(FakeRuntime::new());
        fake.fail_on("create", "image not available");
        let deployer = deployer(&fake, HandlerRegistry::with_defaults());

        let workload = deployer
            .deploy_workload(
                &module(API_RESOURCE_TYPE),
                &DeploymentTarget::docker_local(Some(1)),
                "dep-1",
                None,
            )
            .await;

        let last = workload.stages.last().unwrap();
        assert_eq!(last.stage, "deploy");
        assert!(last.error.as_deref().unwrap().contains("image not available"));
        assert!(last.logs.iter().any(|l| l.starts_with("[error]")));
    }

    #[tokio::test]
    async fn test_persists_and_publishes_updates() {
        let port = spawn_server(healthy_service()).await;
        let fake = Arc::new(FakeRuntime::new());
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::new());
        let updates = Arc::new(AtomicUsize::new(0));
        let counter = updates.clone();
        bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let deployer = deployer(&fake, HandlerRegistry::with_defaults())
            .with_store(store.clone())
            .with_event_bus(bus);
        let workload = deployer
            .deploy_workload(
                &module(API_RESOURCE_TYPE),
                &DeploymentTarget::docker_local(Some(port)),
                "dep-1",
                None,
            )
            .await;

        let stored = store.find_workload(&workload.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkloadStatus::Success);
        assert_eq!(stored.stages.len(), 6);
        // initial + one per stage + final
        assert_eq!(updates.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_readiness_wait_ignores_http_timeout() {
        let port = spawn_server(healthy_service()).await;
        let fake = Arc::new(FakeRuntime::new());
        fake.boot_after_inspects(1);
        let deployer = deployer(&fake, HandlerRegistry::with_defaults());

        // 单次 HTTP 超时小于检查间隔，不应影响容器就绪等待
        let mut module = module(API_RESOURCE_TYPE);
        module.runtime.healthcheck = Some(HealthcheckConfig {
            path: Some("/health".to_string()),
            interval: Some(2000),
            timeout: Some(1000),
            retries: Some(3),
        });

        let workload = deployer
            .deploy_workload(&module, &DeploymentTarget::docker_local(Some(port)), "dep-1", None)
            .await;

        assert_eq!(workload.status, WorkloadStatus::Success, "{:?}", workload.error);
        let inspects = fake
            .calls()
            .iter()
            .filter(|c| c.starts_with("inspect:"))
            .count();
        assert!(inspects >= 2, "expected a second inspect, got {}", inspects);
    }

    #[tokio::test]
    async fn test_deploy_replaces_existing_container() {
        let port = spawn_server(healthy_service()).await;
        let fake = Arc::new(FakeRuntime::new());
        let stale = fake
            .create(&ContainerConfig::new("todo:0.9.0").with_name("module-todo-api"))
            .await
            .unwrap();
        let deployer = deployer(&fake, HandlerRegistry::with_defaults());

        let workload = deployer
            .deploy_workload(
                &module(API_RESOURCE_TYPE),
                &DeploymentTarget::docker_local(Some(port)),
                "dep-1",
                None,
            )
            .await;

        assert_eq!(workload.status, WorkloadStatus::Success, "{:?}", workload.error);
        let calls = fake.calls();
        let removed = calls
            .iter()
            .position(|c| c == "remove:module-todo-api")
            .expect("old container removed");
        let created = calls
            .iter()
            .rposition(|c| c.starts_with("create:"))
            .expect("new container created");
        assert!(removed < created, "{:?}", calls);
        assert!(matches!(
            fake.inspect(&stale).await,
            Err(e) if e.is_not_found()
        ));
    }
}

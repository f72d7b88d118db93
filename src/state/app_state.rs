//! 应用状态

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::env::EnvConfig;
use crate::infra::{ContainerRuntime, DockerCli, GitCli, SourceFetcher};
use crate::services::orchestrator::{OrchestratorSettings, WorkloadOrchestrator};
use crate::services::pipeline::Deployer;
use crate::services::registry::HandlerRegistry;

use super::event_bus::EventBus;
use super::log_hub::LogHub;
use super::port_pool::PortPool;
use super::store::{MemoryStore, WorkloadStore};

/// 全局 shutdown token，用于优雅关闭所有后台任务
static GLOBAL_SHUTDOWN: std::sync::OnceLock<CancellationToken> = std::sync::OnceLock::new();

/// 获取全局 shutdown token
pub fn get_shutdown_token() -> CancellationToken {
    GLOBAL_SHUTDOWN.get_or_init(CancellationToken::new).clone()
}

/// 触发全局 shutdown
pub fn trigger_shutdown() {
    if let Some(token) = GLOBAL_SHUTDOWN.get() {
        token.cancel();
    }
}

/// 应用状态
pub struct AppState {
    // ========== 核心配置 ==========
    /// API 密钥（用于验证请求）
    pub api_key: String,
    /// 环境配置
    pub config: EnvConfig,
    /// 服务启动时间
    pub started_at: DateTime<Utc>,

    // ========== 存储与通道 ==========
    /// 工作负载与部署记录
    pub store: Arc<dyn WorkloadStore>,
    /// 状态变更事件总线
    pub event_bus: Arc<EventBus>,
    /// 工作负载日志中心
    pub log_hub: Arc<LogHub>,

    // ========== 服务 ==========
    /// 模块类型注册表
    pub registry: Arc<HandlerRegistry>,
    /// 阶段流水线
    pub deployer: Arc<Deployer>,
    /// 工作负载编排器
    pub orchestrator: WorkloadOrchestrator,
}

impl AppState {
    /// 从环境变量创建应用状态
    pub fn new() -> Self {
        Self::from_config(EnvConfig::from_env())
    }

    /// 使用 docker / git CLI 创建
    pub fn from_config(config: EnvConfig) -> Self {
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerCli::new(config.docker.clone()));
        let fetcher: Arc<dyn SourceFetcher> = Arc::new(GitCli::new(config.git_bin.clone()));
        Self::with_components(config, runtime, fetcher, Arc::new(MemoryStore::new()))
    }

    /// 注入运行时、源码获取和存储实现
    pub fn with_components(
        config: EnvConfig,
        runtime: Arc<dyn ContainerRuntime>,
        fetcher: Arc<dyn SourceFetcher>,
        store: Arc<dyn WorkloadStore>,
    ) -> Self {
        tracing::info!(
            api_key_len = config.api_key.len(),
            port = config.port,
            workload_ports = %format!("{}-{}", config.workload_port_min, config.workload_port_max),
            work_root = %config.work_root.display(),
            public_host = %config.public_host,
            "Loaded configuration"
        );

        let event_bus = Arc::new(EventBus::new());
        let log_hub = Arc::new(LogHub::new());
        let registry = Arc::new(HandlerRegistry::with_defaults());
        tracing::info!(module_types = ?registry.list(), "Registered module handlers");

        let deployer = Deployer::new(registry.clone(), runtime.clone())
            .with_public_host(config.public_host.clone())
            .with_store(store.clone())
            .with_event_bus(event_bus.clone());

        let ports = Arc::new(PortPool::new(
            config.workload_port_min,
            config.workload_port_max,
        ));
        let orchestrator = WorkloadOrchestrator::new(
            runtime,
            fetcher,
            store.clone(),
            ports,
            OrchestratorSettings::from_config(&config),
        )
        .with_log_hub(log_hub.clone())
        .with_event_bus(event_bus.clone());

        Self {
            api_key: config.api_key.clone(),
            config,
            started_at: Utc::now(),
            store,
            event_bus,
            log_hub,
            registry,
            deployer: Arc::new(deployer),
            orchestrator,
        }
    }

    /// 运行时长（秒）
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

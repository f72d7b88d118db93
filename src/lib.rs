//! Module Deploy Agent - 模块部署代理
//!
//! 库入口：阶段流水线、工作负载编排与 HTTP 代理

pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod middleware;
pub mod services;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use tokio::signal;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use crate::config::env::constants::{LOG_CHANNEL_RETENTION_MINS, LOG_HUB_SWEEP_INTERVAL_SECS};
use crate::config::EnvConfig;
use crate::state::app_state::{get_shutdown_token, trigger_shutdown};
use crate::state::{AppState, LogHub};

/// 命令行覆盖项
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// 覆盖监听端口
    pub port_override: Option<u16>,
}

/// 初始化日志（RUST_LOG，默认 info）
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// 启动 HTTP 代理，直到收到关闭信号
pub async fn init_and_run_agent_with_config(runtime: RuntimeConfig) -> std::io::Result<()> {
    let mut config = EnvConfig::from_env();
    if let Some(port) = runtime.port_override {
        config.port = port;
    }
    let port = config.port;

    let state = Arc::new(AppState::from_config(config));
    spawn_log_hub_sweep(state.log_hub.clone());
    let app = api::router(state.clone());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(
        port,
        version = config::env::constants::VERSION,
        "Module deploy agent listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Stopping running workloads");
    state.orchestrator.stop_all().await;
    Ok(())
}

/// 定期清理已完成的日志通道
fn spawn_log_hub_sweep(hub: Arc<LogHub>) -> tokio::task::JoinHandle<()> {
    let shutdown = get_shutdown_token();
    tokio::spawn(async move {
        let retention = chrono::Duration::minutes(LOG_CHANNEL_RETENTION_MINS);
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(LOG_HUB_SWEEP_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let removed = hub.cleanup(retention).await;
                    if removed > 0 {
                        debug!(removed, "Removed finished log channels");
                    }
                }
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let shutdown = get_shutdown_token();
    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
        () = shutdown.cancelled() => info!("Shutdown requested"),
    }
    // 结束 SSE 等长连接
    trigger_shutdown();
}

//! 健康检查 API
//!
//! GET /health

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::config::env::constants::VERSION;
use crate::state::AppState;

/// 健康检查响应
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    timestamp: String,
    uptime_secs: i64,
    /// 已注册的模块类型
    module_types: Vec<String>,
    running_workloads: usize,
    available_ports: usize,
    log_channels: usize,
}

/// 创建健康检查路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

/// 健康检查
///
/// GET /health
/// 无需认证
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        service: "module-deploy-agent",
        version: VERSION,
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_secs: state.uptime_secs(),
        module_types: state.registry.list(),
        running_workloads: state.orchestrator.running_count().await,
        available_ports: state.orchestrator.ports().available_count(),
        log_channels: state.log_hub.active_count().await,
    })
}

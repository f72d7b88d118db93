//! API 模块
//!
//! HTTP handlers 和路由组装

pub mod deployments;
pub mod events;
pub mod health;
pub mod workloads;

use axum::Router;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

/// 构建完整的 API 路由
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health
        .merge(health::router())
        // Pipeline
        .merge(deployments::router())
        // Orchestrator
        .merge(workloads::router())
        // Event bus
        .merge(events::router())
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

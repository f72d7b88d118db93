//! 工作负载 API
//!
//! 包含 /workloads, /workloads/:id 以及启动、停止、状态、日志端点

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::domain::{Deployment, Workload};
use crate::error::{ApiError, ApiResult};
use crate::middleware::RequireApiKey;
use crate::state::AppState;

/// 日志流检查完成标记的间隔
const FINISH_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// 创建工作负载请求
#[derive(Debug, Default, Deserialize)]
pub struct CreateWorkloadRequest {
    pub deployment_id: Option<String>,
    pub project_id: Option<String>,
    /// 仓库内服务子目录，默认 "service"
    pub service_dir: Option<String>,
    /// 服务暴露的资源名，默认 "items"
    pub resource: Option<String>,
}

/// 启动请求
#[derive(Debug, Deserialize)]
pub struct StartWorkloadRequest {
    pub repo_url: String,
}

/// 启动响应
#[derive(Debug, Serialize)]
pub struct StartWorkloadResponse {
    pub workload_id: String,
    pub status: &'static str,
    pub stream_url: String,
}

/// 日志响应
#[derive(Debug, Serialize)]
pub struct WorkloadLogsResponse {
    pub workload_id: String,
    pub logs: Vec<String>,
}

/// 创建工作负载路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/workloads", post(create_workload).get(list_workloads))
        .route("/workloads/:id", get(get_workload))
        .route("/workloads/:id/start", post(start_workload))
        .route("/workloads/:id/stop", post(stop_workload))
        .route("/workloads/:id/status", get(get_status))
        .route("/workloads/:id/logs", get(get_logs))
        .route("/workloads/:id/logs/stream", get(stream_logs))
}

/// 创建待启动的工作负载记录
///
/// POST /workloads
/// 需要 API Key
async fn create_workload(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateWorkloadRequest>,
) -> ApiResult<impl IntoResponse> {
    let deployment_id = match request.deployment_id {
        Some(id) if state.store.find_deployment(&id).await?.is_some() => id,
        other => {
            let id = other.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            state
                .store
                .insert_deployment(Deployment::new(id.clone(), request.project_id.clone(), "workload"))
                .await?;
            id
        }
    };

    let mut workload = Workload::new_pending(uuid::Uuid::new_v4().to_string(), deployment_id);
    workload.project_id = request.project_id;
    workload.service_dir = request.service_dir;
    workload.resource = request.resource;
    state.store.insert_workload(workload.clone()).await?;

    Ok((StatusCode::CREATED, Json(workload)))
}

/// GET /workloads
async fn list_workloads(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.find_all_workloads().await?))
}

/// GET /workloads/:id
async fn get_workload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let workload = state
        .store
        .find_workload(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Workload '{}'", id)))?;
    Ok(Json(workload))
}

/// 克隆、构建并运行工作负载
///
/// POST /workloads/:id/start
/// 需要 API Key，启动在后台进行，进度通过日志流查看
async fn start_workload(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<StartWorkloadRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.repo_url.trim().is_empty() {
        return Err(ApiError::bad_request("repo_url is required"));
    }
    let status = state.orchestrator.get_status(&id).await?;
    if status.running {
        return Err(ApiError::conflict(format!("Workload {} is already running", id)));
    }
    state.log_hub.create(&id).await;

    let orchestrator = state.orchestrator.clone();
    let workload_id = id.clone();
    tokio::spawn(async move {
        match orchestrator.start(&workload_id, &request.repo_url).await {
            Ok(snapshot) => info!(
                workload_id = %workload_id,
                port = ?snapshot.port,
                "Workload started"
            ),
            Err(e) => error!(workload_id = %workload_id, error = %e, "Workload failed to start"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(StartWorkloadResponse {
            stream_url: format!("/workloads/{}/logs/stream", id),
            workload_id: id,
            status: "starting",
        }),
    ))
}

/// POST /workloads/:id/stop
/// 需要 API Key
async fn stop_workload(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.orchestrator.stop(&id).await?;
    Ok(Json(state.orchestrator.get_status(&id).await?))
}

/// GET /workloads/:id/status
async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.get_status(&id).await?))
}

/// GET /workloads/:id/logs
async fn get_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let logs = state.orchestrator.get_logs(&id).await?;
    Ok(Json(WorkloadLogsResponse {
        workload_id: id,
        logs,
    }))
}

/// 流式日志
///
/// GET /workloads/:id/logs/stream
/// 无需认证；通道完成后发送 `complete` 事件并关闭
async fn stream_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let mut rx = state
        .log_hub
        .subscribe(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Log stream for workload '{}'", id)))?;

    let stream = async_stream::stream! {
        loop {
            match tokio::time::timeout(FINISH_POLL_INTERVAL, rx.recv()).await {
                Ok(Ok(line)) => {
                    let json = serde_json::to_string(&line).unwrap_or_default();
                    yield Ok(Event::default().data(json));
                }
                Ok(Err(broadcast::error::RecvError::Lagged(n))) => {
                    warn!(workload_id = %id, lagged = n, "Log subscriber lagged");
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => break,
                Err(_) => {
                    if state.log_hub.is_finished(&id).await {
                        break;
                    }
                }
            }
        }

        if let Ok(status) = state.orchestrator.get_status(&id).await {
            let json = serde_json::to_string(&status).unwrap_or_default();
            yield Ok(Event::default().event("complete").data(json));
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    ))
}

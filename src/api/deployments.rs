//! 部署 API
//!
//! 包含 /deployments, /deployments/:id 端点

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{BusEvent, Deployment, DeploymentTarget, ModuleDefinition, Workload};
use crate::error::{ApiError, ApiResult};
use crate::middleware::RequireApiKey;
use crate::services::orchestrator::OrchestratorError;
use crate::state::AppState;

/// 创建部署请求
#[derive(Debug, Deserialize)]
pub struct CreateDeploymentRequest {
    /// 复用已有部署记录，缺省时新建
    pub deployment_id: Option<String>,
    pub project_id: Option<String>,
    pub module: ModuleDefinition,
    /// 缺省为 docker-local
    pub target: Option<DeploymentTarget>,
}

/// 创建部署响应
#[derive(Debug, Serialize)]
pub struct CreateDeploymentResponse {
    pub deployment_id: String,
    pub workload_id: String,
    pub status: &'static str,
    pub status_url: String,
}

/// 部署详情
#[derive(Debug, Serialize)]
pub struct DeploymentResponse {
    pub deployment: Deployment,
    pub workloads: Vec<Workload>,
}

/// 删除部署响应
#[derive(Debug, Serialize)]
pub struct DeleteDeploymentResponse {
    pub deployment_id: String,
    pub deleted: bool,
    pub workloads_removed: usize,
}

/// 创建部署路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deployments", post(create_deployment).get(list_deployments))
        .route(
            "/deployments/:id",
            get(get_deployment).delete(delete_deployment),
        )
}

/// 启动一次流水线运行
///
/// POST /deployments
/// 需要 API Key，流水线在后台执行，立即返回工作负载 ID
async fn create_deployment(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateDeploymentRequest>,
) -> ApiResult<impl IntoResponse> {
    let CreateDeploymentRequest {
        deployment_id,
        project_id,
        module,
        target,
    } = request;
    let target = target.unwrap_or_else(|| DeploymentTarget::docker_local(None));

    let deployment = match deployment_id {
        Some(id) => match state.store.find_deployment(&id).await? {
            Some(existing) => existing,
            None => {
                let deployment = Deployment::new(id, project_id.clone(), module.name.clone());
                state.store.insert_deployment(deployment.clone()).await?;
                deployment
            }
        },
        None => {
            let deployment = Deployment::new(
                uuid::Uuid::new_v4().to_string(),
                project_id.clone(),
                module.name.clone(),
            );
            state.store.insert_deployment(deployment.clone()).await?;
            deployment
        }
    };

    let mut workload = Workload::for_module(
        uuid::Uuid::new_v4().to_string(),
        deployment.id.clone(),
        &module,
        &target,
    );
    workload.project_id = project_id.or_else(|| deployment.project_id.clone());
    state.store.insert_workload(workload.clone()).await?;

    let workload_id = workload.id.clone();
    info!(
        workload_id = %workload_id,
        deployment_id = %deployment.id,
        module = %module.id,
        "Deployment accepted"
    );

    let deployer = state.deployer.clone();
    tokio::spawn(async move {
        deployer.run(workload, &module, &target, None).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateDeploymentResponse {
            deployment_id: deployment.id,
            status_url: format!("/workloads/{}", workload_id),
            workload_id,
            status: "running",
        }),
    ))
}

/// GET /deployments
async fn list_deployments(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.find_all_deployments().await?))
}

/// GET /deployments/:id
async fn get_deployment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let deployment = state
        .store
        .find_deployment(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Deployment '{}'", id)))?;
    let workloads = workloads_of(&state, &id).await?;
    Ok(Json(DeploymentResponse {
        deployment,
        workloads,
    }))
}

/// 删除部署及其工作负载
///
/// DELETE /deployments/:id
/// 需要 API Key；运行中的工作负载会先被停止
async fn delete_deployment(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let deployment = state
        .store
        .find_deployment(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Deployment '{}'", id)))?;

    let mut removed = 0;
    for workload in workloads_of(&state, &id).await? {
        match state.orchestrator.stop(&workload.id).await {
            Ok(()) | Err(OrchestratorError::NotRunning(_)) => {}
            Err(e) => warn!(workload_id = %workload.id, error = %e, "Failed to stop workload"),
        }
        if state.store.delete_workload(&workload.id).await? {
            removed += 1;
        }
        state.log_hub.finish(&workload.id).await;
    }
    let deleted = state.store.delete_deployment(&id).await?;

    state.event_bus.publish(&BusEvent::DeploymentDeleted {
        deployment_id: id.clone(),
        project_id: deployment.project_id,
    });
    info!(deployment_id = %id, workloads_removed = removed, "Deployment deleted");

    Ok(Json(DeleteDeploymentResponse {
        deployment_id: id,
        deleted,
        workloads_removed: removed,
    }))
}

async fn workloads_of(state: &AppState, deployment_id: &str) -> ApiResult<Vec<Workload>> {
    Ok(state
        .store
        .find_all_workloads()
        .await?
        .into_iter()
        .filter(|w| w.deployment_id == deployment_id)
        .collect())
}

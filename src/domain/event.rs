//! 事件模型
//!
//! - `DeployEvent`: 流水线运行过程中的结构化事件（CLI 渲染器消费）
//! - `BusEvent`: 事件总线上的状态变更事件（SSE 推送消费）

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::workload::{StageResult, Workload, WorkloadStatus};

/// 流水线事件
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DeployEvent {
    #[serde(rename_all = "camelCase")]
    StageStart { workload_id: String, stage: String },
    #[serde(rename_all = "camelCase")]
    Log {
        workload_id: String,
        stage: String,
        level: String,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    StageComplete {
        workload_id: String,
        stage: String,
        result: StageResult,
    },
    #[serde(rename_all = "camelCase")]
    TestStart { workload_id: String, name: String },
    #[serde(rename_all = "camelCase")]
    TestComplete {
        workload_id: String,
        name: String,
        passed: bool,
        skipped: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Artifact {
        workload_id: String,
        key: String,
        value: String,
    },
    #[serde(rename_all = "camelCase")]
    WorkloadComplete {
        workload_id: String,
        status: WorkloadStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// 事件总线事件
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BusEvent {
    #[serde(rename_all = "camelCase")]
    WorkloadUpdate {
        workload_id: String,
        deployment_id: String,
        project_id: Option<String>,
        stage: String,
        status: WorkloadStatus,
        stages: Vec<StageResult>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    DeploymentDeleted {
        deployment_id: String,
        project_id: Option<String>,
    },
}

impl BusEvent {
    /// 由工作负载记录生成更新事件
    pub fn workload_update(workload: &Workload) -> Self {
        BusEvent::WorkloadUpdate {
            workload_id: workload.id.clone(),
            deployment_id: workload.deployment_id.clone(),
            project_id: workload.project_id.clone(),
            stage: workload.current_stage.clone(),
            status: workload.status,
            stages: workload.stages.clone(),
            timestamp: Utc::now(),
        }
    }

    /// SSE 事件名
    pub fn kind(&self) -> &'static str {
        match self {
            BusEvent::WorkloadUpdate { .. } => "workload-update",
            BusEvent::DeploymentDeleted { .. } => "deployment-deleted",
        }
    }
}

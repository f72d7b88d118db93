//! 工作负载相关领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::module::{DeploymentTarget, ModuleDefinition};

/// 工作负载状态
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadStatus {
    Pending,
    Running,
    Success,
    Failed,
    Rolledback,
    Stopped,
}

impl WorkloadStatus {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadStatus::Pending => "pending",
            WorkloadStatus::Running => "running",
            WorkloadStatus::Success => "success",
            WorkloadStatus::Failed => "failed",
            WorkloadStatus::Rolledback => "rolledback",
            WorkloadStatus::Stopped => "stopped",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkloadStatus::Success
                | WorkloadStatus::Failed
                | WorkloadStatus::Rolledback
                | WorkloadStatus::Stopped
        )
    }
}

/// 阶段结果状态
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Failed,
}

/// 单个阶段的执行结果
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    /// 阶段名（validate, build, deploy ...）
    pub stage: String,
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// 持续时间（毫秒）
    pub duration: i64,
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageResult {
    /// 根据开始时间与执行结果生成阶段记录
    pub fn finish(
        stage: &str,
        started_at: DateTime<Utc>,
        logs: Vec<String>,
        error: Option<String>,
    ) -> Self {
        let completed_at = Utc::now();
        Self {
            stage: stage.to_string(),
            status: if error.is_none() {
                StageStatus::Success
            } else {
                StageStatus::Failed
            },
            started_at,
            completed_at,
            duration: (completed_at - started_at).num_milliseconds(),
            logs,
            error,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == StageStatus::Failed
    }
}

/// 部署产物
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// 工作负载记录（持久化）
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    pub id: String,
    pub deployment_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub module_id: String,
    pub module_name: String,
    pub module_type: String,
    pub status: WorkloadStatus,
    pub current_stage: String,
    /// 只追加，按执行顺序
    pub stages: Vec<StageResult>,
    #[serde(default)]
    pub target: Option<DeploymentTarget>,
    #[serde(default)]
    pub artifacts: Artifacts,
    /// 仓库内服务子目录（编排器使用）
    #[serde(default)]
    pub service_dir: Option<String>,
    /// 服务暴露的资源名（编排器使用）
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Workload {
    /// 为一次流水线运行创建记录
    pub fn for_module(
        id: String,
        deployment_id: String,
        module: &ModuleDefinition,
        target: &DeploymentTarget,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            deployment_id,
            project_id: None,
            module_id: module.id.clone(),
            module_name: module.name.clone(),
            module_type: module.module_type.clone(),
            status: WorkloadStatus::Pending,
            current_stage: "pending".to_string(),
            stages: Vec::new(),
            target: Some(target.clone()),
            artifacts: Artifacts::default(),
            service_dir: None,
            resource: None,
            logs: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// 编排器使用的最小记录
    pub fn new_pending(id: impl Into<String>, deployment_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            deployment_id: deployment_id.into(),
            project_id: None,
            module_id: String::new(),
            module_name: String::new(),
            module_type: String::new(),
            status: WorkloadStatus::Pending,
            current_stage: "pending".to_string(),
            stages: Vec::new(),
            target: None,
            artifacts: Artifacts::default(),
            service_dir: None,
            resource: None,
            logs: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// 追加阶段结果
    ///
    /// 已有失败阶段后不再追加，失败结果会把状态置为 failed
    pub fn push_stage(&mut self, result: StageResult) -> bool {
        if self.has_failed_stage() {
            return false;
        }
        self.current_stage = result.stage.clone();
        if result.is_failed() {
            self.status = WorkloadStatus::Failed;
            self.error = result.error.clone();
        }
        self.stages.push(result);
        self.touch();
        true
    }

    pub fn has_failed_stage(&self) -> bool {
        self.stages.iter().any(StageResult::is_failed)
    }

    /// 设置完成状态
    pub fn complete(&mut self, status: WorkloadStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// 部署记录
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Deployment {
    pub fn new(id: impl Into<String>, project_id: Option<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            project_id,
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// 编排器阶段机
///
/// pending → starting-container → cloning-repo → starting-service → running，
/// 任意阶段可进入 failed；停止路径 running → graceful-shutdown → stopped
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum WorkloadPhase {
    Pending,
    StartingContainer,
    CloningRepo,
    StartingService,
    Running,
    GracefulShutdown,
    Stopped,
    Failed,
}

impl WorkloadPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadPhase::Pending => "pending",
            WorkloadPhase::StartingContainer => "starting-container",
            WorkloadPhase::CloningRepo => "cloning-repo",
            WorkloadPhase::StartingService => "starting-service",
            WorkloadPhase::Running => "running",
            WorkloadPhase::GracefulShutdown => "graceful-shutdown",
            WorkloadPhase::Stopped => "stopped",
            WorkloadPhase::Failed => "failed",
        }
    }

    /// 阶段对应的记录状态
    pub fn status(&self) -> WorkloadStatus {
        match self {
            WorkloadPhase::Pending => WorkloadStatus::Pending,
            WorkloadPhase::Stopped => WorkloadStatus::Stopped,
            WorkloadPhase::Failed => WorkloadStatus::Failed,
            _ => WorkloadStatus::Running,
        }
    }
}

/// 日志行
#[derive(Clone, Debug, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub level: String, // info | warn | error
    pub content: String,
}

impl LogLine {
    pub fn new(level: &str, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: level.to_string(),
            content: content.into(),
        }
    }

    pub fn info(content: impl Into<String>) -> Self {
        Self::new("info", content)
    }

    pub fn warn(content: impl Into<String>) -> Self {
        Self::new("warn", content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new("error", content)
    }

    /// 持久化格式 `[ts] [level] content`
    pub fn render(&self) -> String {
        format!(
            "[{}] [{}] {}",
            self.timestamp.to_rfc3339(),
            self.level,
            self.content
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(name: &str, error: Option<&str>) -> StageResult {
        StageResult::finish(name, Utc::now(), vec![], error.map(str::to_string))
    }

    #[test]
    fn test_status_as_str_and_terminal() {
        assert_eq!(WorkloadStatus::Rolledback.as_str(), "rolledback");
        assert!(!WorkloadStatus::Running.is_terminal());
        assert!(!WorkloadStatus::Pending.is_terminal());
        assert!(WorkloadStatus::Stopped.is_terminal());
    }

    #[test]
    fn test_push_stage_stops_after_failure() {
        let mut workload = Workload::new_pending("w-1", "d-1");

        assert!(workload.push_stage(stage("validate", None)));
        assert!(workload.push_stage(stage("build", Some("boom"))));
        assert_eq!(workload.status, WorkloadStatus::Failed);
        assert_eq!(workload.error.as_deref(), Some("boom"));

        // 失败后不再追加
        assert!(!workload.push_stage(stage("deploy", None)));
        assert_eq!(workload.stages.len(), 2);
        assert_eq!(workload.current_stage, "build");
    }

    #[test]
    fn test_stage_result_duration() {
        let started = Utc::now() - chrono::Duration::milliseconds(50);
        let result = StageResult::finish("build", started, vec!["x".into()], None);
        assert_eq!(result.status, StageStatus::Success);
        assert!(result.duration >= 50);
    }

    #[test]
    fn test_phase_mapping() {
        assert_eq!(WorkloadPhase::CloningRepo.as_str(), "cloning-repo");
        assert_eq!(WorkloadPhase::CloningRepo.status(), WorkloadStatus::Running);
        assert_eq!(WorkloadPhase::Stopped.status(), WorkloadStatus::Stopped);
        assert_eq!(
            serde_json::to_string(&WorkloadPhase::GracefulShutdown).unwrap(),
            "\"graceful-shutdown\""
        );
    }

    #[test]
    fn test_log_line_render() {
        let line = LogLine::warn("disk low");
        assert!(line.render().ends_with("[warn] disk low"));
    }
}

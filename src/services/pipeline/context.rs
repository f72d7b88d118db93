//! 阶段执行上下文
//!
//! 单个阶段执行期间的日志收集与事件发送

use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::domain::DeployEvent;
use crate::services::lifecycle::ContainerLifecycle;

/// 阶段执行上下文
///
/// 每个阶段一个，阶段结束后取出收集到的日志写入 StageResult
pub struct StageContext<'a> {
    pub workload_id: &'a str,
    pub stage: &'static str,
    pub lifecycle: &'a ContainerLifecycle,
    pub public_host: &'a str,
    pub http: &'a reqwest::Client,
    events: Option<&'a mpsc::UnboundedSender<DeployEvent>>,
    logs: Mutex<Vec<String>>,
}

impl<'a> StageContext<'a> {
    pub fn new(
        workload_id: &'a str,
        stage: &'static str,
        lifecycle: &'a ContainerLifecycle,
        public_host: &'a str,
        http: &'a reqwest::Client,
        events: Option<&'a mpsc::UnboundedSender<DeployEvent>>,
    ) -> Self {
        Self {
            workload_id,
            stage,
            lifecycle,
            public_host,
            http,
            events,
            logs: Mutex::new(Vec::new()),
        }
    }

    /// 记录日志：写入阶段日志、tracing，并发送 log 事件
    pub fn log(&self, level: &str, message: &str) {
        match level {
            "error" => error!(workload_id = %self.workload_id, stage = self.stage, "{}", message),
            "warn" => warn!(workload_id = %self.workload_id, stage = self.stage, "{}", message),
            _ => info!(workload_id = %self.workload_id, stage = self.stage, "{}", message),
        }

        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("[{}] {}", level, message));

        self.emit(DeployEvent::Log {
            workload_id: self.workload_id.to_string(),
            stage: self.stage.to_string(),
            level: level.to_string(),
            message: message.to_string(),
        });
    }

    pub fn info(&self, message: &str) {
        self.log("info", message);
    }

    pub fn warn(&self, message: &str) {
        self.log("warn", message);
    }

    pub fn error(&self, message: &str) {
        self.log("error", message);
    }

    /// 发送产物事件
    pub fn artifact(&self, key: &str, value: impl ToString) {
        self.emit(DeployEvent::Artifact {
            workload_id: self.workload_id.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    /// 发送事件，接收端关闭时忽略
    pub fn emit(&self, event: DeployEvent) {
        if let Some(tx) = self.events {
            let _ = tx.send(event);
        }
    }

    /// 取出已收集的日志
    pub fn take_logs(&self) -> Vec<String> {
        std::mem::take(&mut *self.logs.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

//! 统一错误处理
//!
//! `ApiError` 实现 `IntoResponse`，服务层错误通过 `From` 转换为对应的 HTTP 状态

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::services::orchestrator::OrchestratorError;
use crate::state::store::StoreError;

/// API 错误响应结构
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// 统一 API 错误类型
#[derive(Debug)]
pub enum ApiError {
    /// 401 - 未授权（API Key 无效或缺失）
    Unauthorized,
    /// 404 - 资源未找到
    NotFound(String),
    /// 400 - 请求无效
    BadRequest(String),
    /// 409 - 冲突（如：工作负载已在运行）
    Conflict(String),
    /// 500 - 内部错误
    Internal(String),
    /// 503 - 服务不可用（如：端口池耗尽）
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn unauthorized() -> Self {
        Self::Unauthorized
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Invalid or missing API key".to_string(),
            ),
            ApiError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("{} not found", resource),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
        };

        let body = ErrorResponse::new(error_type, message);
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Unauthorized => write!(f, "Unauthorized"),
            ApiError::NotFound(r) => write!(f, "Not found: {}", r),
            ApiError::BadRequest(m) => write!(f, "Bad request: {}", m),
            ApiError::Conflict(m) => write!(f, "Conflict: {}", m),
            ApiError::Internal(m) => write!(f, "Internal error: {}", m),
            ApiError::ServiceUnavailable(m) => write!(f, "Service unavailable: {}", m),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => ApiError::NotFound(format!("{} {}", kind, id)),
            StoreError::AlreadyExists { .. } => ApiError::Conflict(err.to_string()),
            StoreError::Backend(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::WorkloadNotFound(id) => ApiError::NotFound(format!("Workload {}", id)),
            OrchestratorError::NotRunning(_) | OrchestratorError::AlreadyRunning(_) => {
                ApiError::Conflict(err.to_string())
            }
            OrchestratorError::Clone(_)
            | OrchestratorError::MissingServiceDir(_)
            | OrchestratorError::MissingManifest(_) => ApiError::BadRequest(err.to_string()),
            OrchestratorError::Ports(_) => ApiError::ServiceUnavailable(err.to_string()),
            OrchestratorError::Store(store) => store.into(),
            OrchestratorError::Runtime(_) | OrchestratorError::Io(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

/// 便捷类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::port_pool::PortPoolError;

    #[test]
    fn test_error_response_new() {
        let resp = ErrorResponse::new("test_error", "Test message");
        assert_eq!(resp.error, "test_error");
        assert_eq!(resp.message, "Test message");
        assert!(resp.details.is_none());
    }

    #[test]
    fn test_error_response_with_details() {
        let resp = ErrorResponse::new("test_error", "Test message").with_details("Extra info");
        assert_eq!(resp.details, Some("Extra info".to_string()));
    }

    #[test]
    fn test_orchestrator_error_mapping() {
        let not_running: ApiError = OrchestratorError::NotRunning("w-1".into()).into();
        assert!(matches!(not_running, ApiError::Conflict(ref m) if m == "Workload w-1 is not running"));

        let missing: ApiError = OrchestratorError::WorkloadNotFound("w-2".into()).into();
        assert_eq!(
            missing.into_response().status(),
            StatusCode::NOT_FOUND
        );

        let exhausted: ApiError = OrchestratorError::Ports(PortPoolError::Exhausted).into();
        assert_eq!(
            exhausted.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_store_error_mapping() {
        let err: ApiError = StoreError::NotFound {
            kind: "deployment",
            id: "d-1".into(),
        }
        .into();
        assert!(matches!(err, ApiError::NotFound(ref r) if r == "deployment d-1"));
    }
}

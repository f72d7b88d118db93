//! API Key 认证
//!
//! `RequireApiKey` extractor 用于所有会修改状态的路由

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::HeaderMap, request::Parts},
};
use std::sync::Arc;

use crate::error::ApiError;
use crate::state::AppState;

/// 请求头名称
pub const API_KEY_HEADER: &str = "x-api-key";

/// API Key 认证 Extractor
///
/// ```ignore
/// async fn stop_workload(
///     _auth: RequireApiKey,
///     State(state): State<Arc<AppState>>,
/// ) -> ApiResult<impl IntoResponse> {
///     // ...
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RequireApiKey;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireApiKey {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        verify_api_key(&parts.headers, &state.api_key)
    }
}

/// 检查 `x-api-key` 是否与配置的密钥一致
pub fn verify_api_key(headers: &HeaderMap, expected_key: &str) -> Result<RequireApiKey, ApiError> {
    let provided_key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    match provided_key {
        Some(key) if !expected_key.is_empty() && key == expected_key => Ok(RequireApiKey),
        Some(_) => {
            tracing::warn!("Invalid API key provided");
            Err(ApiError::unauthorized())
        }
        None => {
            tracing::warn!("Missing x-api-key header");
            Err(ApiError::unauthorized())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_verify_api_key_success() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("test-key"));
        assert!(verify_api_key(&headers, "test-key").is_ok());
    }

    #[test]
    fn test_verify_api_key_wrong_key() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("wrong-key"));
        assert!(verify_api_key(&headers, "test-key").is_err());
    }

    #[test]
    fn test_verify_api_key_missing() {
        assert!(verify_api_key(&HeaderMap::new(), "test-key").is_err());
    }

    #[test]
    fn test_empty_configured_key_rejects_everything() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static(""));
        assert!(verify_api_key(&headers, "").is_err());
    }
}

//! HTTP checks against a deployed workload

use reqwest::{Client, Method};
use std::time::Duration;

use crate::domain::HttpTestConfig;

/// Per-request timeout for declared tests
pub const TEST_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a declared HTTP test did not pass
#[derive(Debug, thiserror::Error)]
pub enum TestFailure {
    #[error("invalid method '{0}'")]
    InvalidMethod(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("expected status {expected}, got {actual}")]
    UnexpectedStatus { expected: u16, actual: u16 },
    #[error("response body does not contain '{0}'")]
    MissingBody(String),
}

/// Join a base URL and a path without doubling or dropping the slash
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.is_empty() {
        base.to_string()
    } else if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Single GET attempt; `Ok(true)` on a 2xx answer
pub async fn check_once(client: &Client, url: &str, timeout: Duration) -> Result<bool, reqwest::Error> {
    let response = client.get(url).timeout(timeout).send().await?;
    Ok(response.status().is_success())
}

/// Run one declared HTTP test against `base_url`
pub async fn run_http_test(
    client: &Client,
    base_url: &str,
    config: &HttpTestConfig,
) -> Result<(), TestFailure> {
    let method = Method::from_bytes(config.method.to_uppercase().as_bytes())
        .map_err(|_| TestFailure::InvalidMethod(config.method.clone()))?;

    let mut request = client
        .request(method, join_url(base_url, &config.path))
        .timeout(TEST_REQUEST_TIMEOUT);
    for (name, value) in &config.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &config.body {
        request = request.json(body);
    }

    let response = request.send().await?;
    let actual = response.status().as_u16();
    let body = response.text().await?;

    if let Some(expected) = config.expect.status {
        if actual != expected {
            return Err(TestFailure::UnexpectedStatus { expected, actual });
        }
    }
    if let Some(needle) = &config.expect.body_contains {
        if !body.contains(needle.as_str()) {
            return Err(TestFailure::MissingBody(needle.clone()));
        }
    }
    Ok(())
}

//! Container lifecycle
//!
//! Higher-level create/start/stop/cleanup built on top of a `ContainerRuntime`.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::env::constants::{CLEANUP_STOP_TIMEOUT_SECS, GRACEFUL_STOP_TIMEOUT_SECS};
use crate::domain::{ContainerConfig, HealthcheckConfig};
use crate::infra::docker::{ContainerRuntime, RuntimeError};

const DEFAULT_READY_INTERVAL_MS: u64 = 1000;
const DEFAULT_READY_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_READY_RETRIES: u32 = 30;

/// Errors raised while waiting for a container
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Container {id} is dead")]
    Dead { id: String },
    #[error("Container {id} exited with code {code}")]
    Exited { id: String, code: i64 },
    #[error("Container {id} did not become ready within {waited_ms}ms")]
    Timeout { id: String, waited_ms: u128 },
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Non-fatal problems encountered during cleanup
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub warnings: Vec<String>,
}

/// Container lifecycle manager
#[derive(Clone)]
pub struct ContainerLifecycle {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ContainerLifecycle {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub async fn create(&self, config: &ContainerConfig) -> Result<String, RuntimeError> {
        self.runtime.create(config).await
    }

    pub async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.runtime.start(id).await
    }

    /// Stop a container.
    ///
    /// Graceful mode tries a 10 second stop and falls back to kill; failures
    /// on that path come back as warnings. Non-graceful mode kills directly
    /// and propagates the error.
    pub async fn stop(&self, id: &str, graceful: bool) -> Result<Vec<String>, RuntimeError> {
        if !graceful {
            self.runtime.kill(id).await?;
            return Ok(Vec::new());
        }

        let mut warnings = Vec::new();
        let timeout = Duration::from_secs(GRACEFUL_STOP_TIMEOUT_SECS);
        if let Err(e) = self.runtime.stop(id, timeout).await {
            warn!(container = %id, error = %e, "Graceful stop failed, killing container");
            warnings.push(format!("graceful stop failed: {}", e));
            if let Err(e) = self.runtime.kill(id).await {
                warn!(container = %id, error = %e, "Kill failed");
                warnings.push(format!("kill failed: {}", e));
            }
        }
        Ok(warnings)
    }

    pub async fn restart(&self, id: &str) -> Result<Vec<String>, RuntimeError> {
        let warnings = self.stop(id, true).await?;
        self.runtime.start(id).await?;
        Ok(warnings)
    }

    /// Best-effort stop, then forced removal.
    ///
    /// Only a failed removal is an error.
    pub async fn cleanup(&self, id: &str) -> Result<CleanupReport, RuntimeError> {
        let mut report = CleanupReport::default();

        let timeout = Duration::from_secs(CLEANUP_STOP_TIMEOUT_SECS);
        if let Err(e) = self.runtime.stop(id, timeout).await {
            debug!(container = %id, error = %e, "Stop before removal failed");
            report.warnings.push(format!("stop failed: {}", e));
        }

        self.runtime.remove(id, true).await?;
        info!(container = %id, warnings = report.warnings.len(), "Container removed");
        Ok(report)
    }

    /// Poll `inspect` until the container reports running.
    pub async fn wait_for_ready(
        &self,
        id: &str,
        healthcheck: Option<&HealthcheckConfig>,
    ) -> Result<(), LifecycleError> {
        let interval = Duration::from_millis(
            healthcheck
                .and_then(|h| h.interval)
                .unwrap_or(DEFAULT_READY_INTERVAL_MS),
        );
        let timeout = Duration::from_millis(
            healthcheck
                .and_then(|h| h.timeout)
                .unwrap_or(DEFAULT_READY_TIMEOUT_MS),
        );
        let retries = healthcheck
            .and_then(|h| h.retries)
            .unwrap_or(DEFAULT_READY_RETRIES)
            .max(1);

        let started = Instant::now();
        for attempt in 1..=retries {
            let state = self.runtime.inspect(id).await?;
            if state.running {
                debug!(container = %id, attempt, "Container is running");
                return Ok(());
            }
            if state.dead {
                return Err(LifecycleError::Dead { id: id.to_string() });
            }
            if state.exit_code != 0 {
                return Err(LifecycleError::Exited {
                    id: id.to_string(),
                    code: state.exit_code,
                });
            }

            if attempt == retries || started.elapsed() + interval > timeout {
                break;
            }
            tokio::time::sleep(interval).await;
        }

        Err(LifecycleError::Timeout {
            id: id.to_string(),
            waited_ms: started.elapsed().as_millis(),
        })
    }
}

//! 源码获取
//!
//! 编排器通过 `SourceFetcher` 克隆仓库，默认实现调用 git CLI

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::config::env::constants::CLONE_TIMEOUT_SECS;

use super::command::{combined_output, CommandError, CommandRunner};

/// 克隆错误
#[derive(Debug, thiserror::Error)]
pub enum CloneError {
    #[error("git clone failed: {0}")]
    Failed(String),
    #[error("invalid repository URL: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// 源码获取抽象
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// 把仓库克隆到 `dest`（目录需不存在或为空）
    async fn clone_repo(&self, repo_url: &str, dest: &Path) -> Result<(), CloneError>;
}

/// 基于 git CLI 的实现
pub struct GitCli {
    git_bin: String,
    timeout: Duration,
}

impl GitCli {
    pub fn new(git_bin: impl Into<String>) -> Self {
        Self {
            git_bin: git_bin.into(),
            timeout: Duration::from_secs(CLONE_TIMEOUT_SECS),
        }
    }
}

#[async_trait]
impl SourceFetcher for GitCli {
    async fn clone_repo(&self, repo_url: &str, dest: &Path) -> Result<(), CloneError> {
        let repo_url = repo_url.trim();
        if repo_url.is_empty() || repo_url.starts_with('-') {
            return Err(CloneError::InvalidUrl(repo_url.to_string()));
        }

        info!(repo_url, dest = %dest.display(), ">>> git clone --depth 1");
        let args = vec![
            "clone".to_string(),
            "--depth".to_string(),
            "1".to_string(),
            "--".to_string(),
            repo_url.to_string(),
            dest.to_string_lossy().to_string(),
        ];
        let output = CommandRunner::run_simple(&self.git_bin, &args, None, self.timeout).await?;

        if !output.status.success() {
            return Err(CloneError::Failed(combined_output(&output)));
        }
        Ok(())
    }
}

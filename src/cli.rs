//! `deploy` 命令
//!
//! 从 JSON 文件读取模块定义，在本地 Docker 上运行流水线并打印进度

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::EnvConfig;
use crate::domain::{DeploymentTarget, ModuleDefinition, Workload, WorkloadStatus};
use crate::infra::{ContainerRuntime, DockerCli};
use crate::services::pipeline::Deployer;
use crate::services::progress;
use crate::services::registry::HandlerRegistry;

/// 命令执行前的致命错误
#[derive(Debug, thiserror::Error)]
pub enum DeployCommandError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid module definition {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 读取并解析模块定义文件
pub async fn load_module(path: &Path) -> Result<ModuleDefinition, DeployCommandError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| DeployCommandError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_str(&raw).map_err(|source| DeployCommandError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// 运行一次部署，返回最终的工作负载记录
pub async fn run_deploy(
    path: &Path,
    host_port: Option<u16>,
) -> Result<Workload, DeployCommandError> {
    let module = load_module(path).await?;
    let config = EnvConfig::from_env();
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerCli::new(config.docker.clone()));
    let deployer = Deployer::new(Arc::new(HandlerRegistry::with_defaults()), runtime)
        .with_public_host(config.public_host);

    println!(
        "Deploying {} ({}@{}, type {})",
        module.name, module.id, module.version, module.module_type
    );
    Ok(deploy_with(&deployer, &module, host_port).await)
}

/// 使用给定的 Deployer 运行流水线并把事件打印到控制台
pub async fn deploy_with(
    deployer: &Deployer,
    module: &ModuleDefinition,
    host_port: Option<u16>,
) -> Workload {
    let target = DeploymentTarget::docker_local(host_port);
    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(progress::print_events(rx));

    let deployment_id = uuid::Uuid::new_v4().to_string();
    let workload = deployer
        .deploy_workload(module, &target, &deployment_id, Some(&tx))
        .await;
    drop(tx);
    if let Err(e) = printer.await {
        tracing::warn!(error = %e, "Progress printer stopped unexpectedly");
    }

    if workload.status == WorkloadStatus::Success {
        if let Some(url) = &workload.artifacts.url {
            println!("Available at {}", url);
        }
    }
    workload
}

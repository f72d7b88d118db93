//! 环境变量配置加载

use std::env;
use std::path::PathBuf;
use tracing::warn;

/// 环境配置
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// API 密钥
    pub api_key: String,
    /// 服务监听端口
    pub port: u16,
    /// 工作负载端口池范围（闭区间）
    pub workload_port_min: u16,
    pub workload_port_max: u16,
    /// 工作负载临时目录根路径
    pub work_root: PathBuf,
    /// 容器引擎配置
    pub docker: DockerConfig,
    /// git 可执行文件
    pub git_bin: String,
    /// 对外访问主机名（用于生成部署 URL）
    pub public_host: String,
}

/// 容器引擎配置
#[derive(Clone, Debug)]
pub struct DockerConfig {
    /// docker 可执行文件
    pub docker_bin: String,
    /// 引擎 socket 路径（日志流使用）
    pub socket_path: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            socket_path: "/var/run/docker.sock".to_string(),
        }
    }
}

impl DockerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            docker_bin: env::var("DOCKER_BIN").unwrap_or(defaults.docker_bin),
            socket_path: env::var("DOCKER_SOCKET").unwrap_or(defaults.socket_path),
        }
    }
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        // API Key - 支持旧名称兼容
        let api_key = load_with_fallback("DEPLOY_AGENT_API_KEY", "API_KEY")
            .unwrap_or_else(|| "change-me-in-production".to_string());
        if env::var("API_KEY").is_ok() {
            warn!("Deprecated environment variable API_KEY detected. Please use DEPLOY_AGENT_API_KEY");
        }

        let port = parse_var("PORT").unwrap_or(9876);

        let mut workload_port_min = parse_var("WORKLOAD_PORT_MIN").unwrap_or(4000);
        let mut workload_port_max = parse_var("WORKLOAD_PORT_MAX").unwrap_or(4099);
        if workload_port_min > workload_port_max {
            warn!(
                min = workload_port_min,
                max = workload_port_max,
                "WORKLOAD_PORT_MIN > WORKLOAD_PORT_MAX, swapping"
            );
            std::mem::swap(&mut workload_port_min, &mut workload_port_max);
        }

        let work_root = env::var("WORKLOAD_WORK_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir().join("module-deploy-agent"));

        Self {
            api_key,
            port,
            workload_port_min,
            workload_port_max,
            work_root,
            docker: DockerConfig::from_env(),
            git_bin: env::var("GIT_BIN").unwrap_or_else(|_| "git".to_string()),
            public_host: env::var("PUBLIC_HOST").unwrap_or_else(|_| "localhost".to_string()),
        }
    }
}

/// 加载环境变量，支持 fallback
fn load_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    env::var(primary).ok().or_else(|| env::var(fallback).ok())
}

/// 解析数值型环境变量，无法解析时返回 None
fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// 常量
pub mod constants {
    /// 监控轮询间隔（秒）
    pub const MONITOR_INTERVAL_SECS: u64 = 5;

    /// 容器启动后的宽限期（秒）
    pub const STARTUP_GRACE_SECS: u64 = 2;

    /// 优雅停止超时（秒）
    pub const GRACEFUL_STOP_TIMEOUT_SECS: u64 = 10;

    /// 清理时的停止超时（秒）
    pub const CLEANUP_STOP_TIMEOUT_SECS: u64 = 5;

    /// 生成的服务在容器内监听的端口
    pub const SERVICE_INTERNAL_PORT: u16 = 3000;

    /// 未配置端口时的默认宿主机端口
    pub const DEFAULT_HOST_PORT: u16 = 3000;

    /// git clone 超时（秒）
    pub const CLONE_TIMEOUT_SECS: u64 = 300;

    /// 镜像构建超时（秒）
    pub const BUILD_TIMEOUT_SECS: u64 = 1800; // 30 分钟

    /// 普通 docker 命令超时（秒）
    pub const DOCKER_COMMAND_TIMEOUT_SECS: u64 = 120;

    /// 日志通道清理间隔（秒）
    pub const LOG_HUB_SWEEP_INTERVAL_SECS: u64 = 300;

    /// 已完成日志通道的保留时长（分钟）
    pub const LOG_CHANNEL_RETENTION_MINS: i64 = 30;

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

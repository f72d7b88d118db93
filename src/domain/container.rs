//! 容器相关领域模型

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 容器创建参数
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContainerConfig {
    pub image: String,
    /// 容器名称（可选）
    pub name: Option<String>,
    /// `KEY=VALUE` 形式的环境变量
    pub env: Vec<String>,
    pub ports: Vec<PortBinding>,
    pub labels: HashMap<String, String>,
    /// 覆盖镜像默认命令
    pub cmd: Vec<String>,
}

impl ContainerConfig {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_port(mut self, host_port: u16, container_port: u16) -> Self {
        self.ports.push(PortBinding {
            host_port,
            container_port,
        });
        self
    }

    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// 端口映射（宿主机 → 容器）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortBinding {
    pub host_port: u16,
    pub container_port: u16,
}

impl PortBinding {
    /// `docker -p` 参数格式
    pub fn to_arg(&self) -> String {
        format!("{}:{}", self.host_port, self.container_port)
    }
}

/// `docker inspect` 返回的容器状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerState {
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub restarting: bool,
    #[serde(default)]
    pub dead: bool,
    #[serde(default)]
    pub exit_code: i64,
    #[serde(default)]
    pub error: String,
}

impl ContainerState {
    /// 运行中的状态
    pub fn running() -> Self {
        Self {
            running: true,
            ..Default::default()
        }
    }

    /// 已退出的状态
    pub fn exited(exit_code: i64) -> Self {
        Self {
            exit_code,
            ..Default::default()
        }
    }

    /// 是否以非零码退出或已死亡
    pub fn has_failed(&self) -> bool {
        self.dead || (!self.running && self.exit_code != 0)
    }
}

/// 镜像构建参数
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub tag: String,
    /// Dockerfile 路径（相对于构建上下文）
    pub dockerfile: Option<String>,
    pub build_args: HashMap<String, String>,
}

impl BuildOptions {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }
}

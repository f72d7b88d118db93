//! 模块定义相关领域模型
//!
//! 模块定义由外部提供（JSON 文件或 HTTP 请求体），流水线运行期间只读

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 仅支持的部署目标类型
pub const DOCKER_LOCAL_TARGET: &str = "docker-local";

/// 模块定义
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDefinition {
    pub id: String,
    pub name: String,
    pub version: String,
    /// 处理器注册表的键（如 "api-resource"）
    #[serde(rename = "type")]
    pub module_type: String,
    /// 源码目录
    #[serde(default)]
    pub source_dir: Option<String>,
    /// 处理器自定义配置
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl ModuleDefinition {
    /// 镜像标签 `name:version`
    pub fn image_tag(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }

    /// 派生的容器名称，同一模块的多次部署复用同一名称
    pub fn container_name(&self) -> String {
        let sanitized: String = self
            .id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        format!("module-{}", sanitized)
    }
}

/// 运行时配置
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// 服务在容器内监听的端口
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub healthcheck: Option<HealthcheckConfig>,
}

impl RuntimeConfig {
    /// 展开为 `KEY=VALUE` 形式，按 key 排序保证稳定输出
    pub fn env_pairs(&self) -> Vec<String> {
        let mut pairs: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        pairs.sort();
        pairs
    }
}

/// 健康检查配置
///
/// 所有字段可选，默认值由使用方决定（流水线与容器就绪检查的默认值不同）
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthcheckConfig {
    #[serde(default)]
    pub path: Option<String>,
    /// 重试间隔（毫秒）
    #[serde(default)]
    pub interval: Option<u64>,
    /// 单次超时（毫秒）
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub retries: Option<u32>,
}

/// 部署目标
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentTarget {
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl DeploymentTarget {
    /// 本地 Docker 目标
    pub fn docker_local(host_port: Option<u16>) -> Self {
        let config = match host_port {
            Some(port) => serde_json::json!({ "hostPort": port }),
            None => serde_json::json!({}),
        };
        Self {
            target_type: DOCKER_LOCAL_TARGET.to_string(),
            config,
        }
    }

    /// `config.hostPort`，接受数字或数字字符串
    pub fn host_port(&self) -> Option<u16> {
        let value = self.config.get("hostPort")?;
        value
            .as_u64()
            .and_then(|v| u16::try_from(v).ok())
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
    }
}

/// 处理器校验结果
#[derive(Clone, Debug, Default, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// 由错误与警告列表构造，无错误即有效
    pub fn from_parts(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

/// 测试定义
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestDefinition {
    pub name: String,
    /// 目前只执行 "http"
    #[serde(rename = "type")]
    pub test_type: String,
    pub config: HttpTestConfig,
}

impl TestDefinition {
    /// 创建 HTTP 测试
    pub fn http(name: impl Into<String>, config: HttpTestConfig) -> Self {
        Self {
            name: name.into(),
            test_type: "http".to_string(),
            config,
        }
    }
}

/// HTTP 测试配置
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpTestConfig {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub expect: TestExpectation,
}

impl HttpTestConfig {
    pub fn new(method: &str, path: impl Into<String>) -> Self {
        Self {
            method: method.to_string(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn expect_status(mut self, status: u16) -> Self {
        self.expect.status = Some(status);
        self
    }

    pub fn expect_body_contains(mut self, needle: impl Into<String>) -> Self {
        self.expect.body_contains = Some(needle.into());
        self
    }
}

/// 期望值，全部满足才算通过
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestExpectation {
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub body_contains: Option<String>,
}

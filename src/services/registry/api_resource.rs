//! `api-resource` handler
//!
//! A Node service exposing REST collections. `config.resources` lists the
//! collections, either as plain names or `{ "name": ..., "path": ... }`.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::config::env::constants::DEFAULT_HOST_PORT;
use crate::domain::{
    Artifacts, BuildOptions, HttpTestConfig, ModuleDefinition, TestDefinition, ValidationResult,
};
use crate::infra::docker::ProgressFn;
use crate::services::pipeline::{StageContext, StageError};

use super::{HookOutcome, ModuleHandler};

pub const API_RESOURCE_TYPE: &str = "api-resource";

/// One declared REST collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    pub name: String,
    pub path: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawResource {
    Name(String),
    Object { name: String, path: Option<String> },
}

/// Parse `config.resources`; malformed entries are skipped
pub fn declared_resources(module: &ModuleDefinition) -> Vec<ResourceSpec> {
    let Some(items) = module.config.get("resources").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| serde_json::from_value::<RawResource>(item.clone()).ok())
        .filter_map(|raw| {
            let (name, path) = match raw {
                RawResource::Name(name) => (name, None),
                RawResource::Object { name, path } => (name, path),
            };
            let name = name.trim().to_string();
            if name.is_empty() {
                return None;
            }
            let path = path.unwrap_or_else(|| format!("/{}", name));
            Some(ResourceSpec { name, path })
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct ApiResourceHandler;

impl ApiResourceHandler {
    pub fn new() -> Self {
        Self
    }

    async fn build_from_source(
        &self,
        module: &ModuleDefinition,
        context_dir: &Path,
        ctx: &StageContext<'_>,
    ) -> Result<Artifacts, StageError> {
        let tag = module.image_tag();
        let mut options = BuildOptions::new(tag.clone());

        let dockerfile_path = match self.generate_dockerfile(module) {
            Some(content) if !context_dir.join("Dockerfile").exists() => {
                let path = generated_dockerfile_path(module);
                tokio::fs::write(&path, content).await?;
                ctx.info(&format!("Generated Dockerfile at {}", path.display()));
                options.dockerfile = Some(path.to_string_lossy().into_owned());
                Some(path)
            }
            _ => None,
        };

        ctx.info(&format!("Building image {} from {}", tag, context_dir.display()));
        let on_progress: &ProgressFn<'_> = &|line: &str| ctx.info(line);
        let result = ctx
            .lifecycle
            .runtime()
            .build_image(context_dir, &options, Some(on_progress))
            .await;

        if let Some(path) = dockerfile_path {
            let _ = tokio::fs::remove_file(path).await;
        }

        let image_id = result?;
        ctx.info(&format!("Built image {}", image_id));
        Ok(Artifacts {
            image_name: Some(tag),
            ..Default::default()
        })
    }
}

fn generated_dockerfile_path(module: &ModuleDefinition) -> PathBuf {
    std::env::temp_dir().join(format!(
        "{}-{}.Dockerfile",
        module.container_name(),
        uuid::Uuid::new_v4().simple()
    ))
}

#[async_trait]
impl ModuleHandler for ApiResourceHandler {
    fn module_type(&self) -> &str {
        API_RESOURCE_TYPE
    }

    fn validate(&self, module: &ModuleDefinition) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if declared_resources(module).is_empty() {
            errors.push("At least one resource must be declared in config.resources".to_string());
        }
        if module
            .source_dir
            .as_deref()
            .map_or(true, |dir| dir.trim().is_empty())
        {
            errors.push("sourceDir is required".to_string());
        }
        if module.runtime.port.is_none() {
            warnings.push(format!(
                "No runtime port configured, defaulting to {}",
                DEFAULT_HOST_PORT
            ));
        }
        if module.runtime.healthcheck.is_none() {
            warnings.push("No healthcheck configured, using GET /health".to_string());
        }

        ValidationResult::from_parts(errors, warnings)
    }

    fn generate_dockerfile(&self, module: &ModuleDefinition) -> Option<String> {
        let port = module.runtime.port.unwrap_or(DEFAULT_HOST_PORT);
        Some(format!(
            "FROM node:20-alpine\n\
             WORKDIR /app\n\
             COPY package*.json ./\n\
             RUN npm install --omit=dev\n\
             COPY . .\n\
             ENV NODE_ENV=production\n\
             ENV PORT={port}\n\
             EXPOSE {port}\n\
             CMD [\"npm\", \"start\"]\n"
        ))
    }

    fn get_tests(&self, module: &ModuleDefinition, _artifacts: &Artifacts) -> Vec<TestDefinition> {
        let health_path = module
            .runtime
            .healthcheck
            .as_ref()
            .and_then(|h| h.path.clone())
            .unwrap_or_else(|| "/health".to_string());

        let mut tests = vec![TestDefinition::http(
            "health check",
            HttpTestConfig::new("GET", health_path).expect_status(200),
        )];

        for resource in declared_resources(module) {
            tests.push(TestDefinition::http(
                format!("list {}", resource.name),
                HttpTestConfig::new("GET", resource.path.clone()).expect_status(200),
            ));
            tests.push(TestDefinition::http(
                format!("create {} rejects empty body", resource.name),
                HttpTestConfig::new("POST", resource.path)
                    .with_body(serde_json::json!({}))
                    .expect_status(400),
            ));
        }
        tests
    }

    /// Builds from `sourceDir` when it exists locally, otherwise the image
    /// is assumed to be present already.
    async fn build(&self, module: &ModuleDefinition, ctx: &StageContext<'_>) -> HookOutcome {
        let source_dir = module.source_dir.as_deref()?;
        let context_dir = Path::new(source_dir);
        if !tokio::fs::metadata(context_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return None;
        }
        Some(self.build_from_source(module, context_dir, ctx).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HealthcheckConfig, RuntimeConfig};
    use crate::services::lifecycle::ContainerLifecycle;
    use crate::testing::FakeRuntime;
    use std::sync::Arc;

    fn module(config: serde_json::Value) -> ModuleDefinition {
        ModuleDefinition {
            id: "todo-api".to_string(),
            name: "todo".to_string(),
            version: "1.0.0".to_string(),
            module_type: API_RESOURCE_TYPE.to_string(),
            source_dir: Some("./todo".to_string()),
            config,
            runtime: RuntimeConfig::default(),
        }
    }

    #[test]
    fn test_declared_resources_mixed_forms() {
        let m = module(serde_json::json!({
            "resources": ["tasks", { "name": "users", "path": "/api/users" }, 42, ""]
        }));
        assert_eq!(
            declared_resources(&m),
            vec![
                ResourceSpec {
                    name: "tasks".to_string(),
                    path: "/tasks".to_string()
                },
                ResourceSpec {
                    name: "users".to_string(),
                    path: "/api/users".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_validate_errors_and_warnings() {
        let handler = ApiResourceHandler::new();

        let mut m = module(serde_json::json!({ "resources": [] }));
        m.source_dir = None;
        let result = handler.validate(&m);
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.warnings.len(), 2);

        let mut m = module(serde_json::json!({ "resources": ["tasks"] }));
        m.runtime.port = Some(8080);
        m.runtime.healthcheck = Some(HealthcheckConfig::default());
        let result = handler.validate(&m);
        assert!(result.valid);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_tests_per_resource() {
        let handler = ApiResourceHandler::new();
        let m = module(serde_json::json!({ "resources": ["tasks", "users"] }));
        let tests = handler.get_tests(&m, &Artifacts::default());

        assert_eq!(tests.len(), 5);
        assert_eq!(tests[0].config.path, "/health");
        let create = tests
            .iter()
            .find(|t| t.name == "create users rejects empty body")
            .unwrap();
        assert_eq!(create.config.method, "POST");
        assert_eq!(create.config.expect.status, Some(400));
        assert_eq!(create.config.body, Some(serde_json::json!({})));
    }

    #[test]
    fn test_dockerfile_uses_runtime_port() {
        let mut m = module(serde_json::json!({ "resources": ["tasks"] }));
        m.runtime.port = Some(8080);
        let dockerfile = ApiResourceHandler::new().generate_dockerfile(&m).unwrap();
        assert!(dockerfile.contains("EXPOSE 8080"));
        assert!(dockerfile.starts_with("FROM node:20-alpine"));
    }

    #[tokio::test]
    async fn test_build_hook_skipped_without_source_dir() {
        let fake = Arc::new(FakeRuntime::new());
        let lifecycle = ContainerLifecycle::new(fake.clone());
        let http = reqwest::Client::new();
        let ctx = StageContext::new("wl-1", "build", &lifecycle, "127.0.0.1", &http, None);

        let mut m = module(serde_json::json!({ "resources": ["tasks"] }));
        m.source_dir = Some("/definitely/not/here".to_string());
        assert!(ApiResourceHandler::new().build(&m, &ctx).await.is_none());
        assert!(fake.built().is_empty());
    }

    #[tokio::test]
    async fn test_build_hook_builds_existing_source_dir() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeRuntime::new());
        let lifecycle = ContainerLifecycle::new(fake.clone());
        let http = reqwest::Client::new();
        let ctx = StageContext::new("wl-1", "build", &lifecycle, "127.0.0.1", &http, None);

        let mut m = module(serde_json::json!({ "resources": ["tasks"] }));
        m.source_dir = Some(dir.path().to_string_lossy().into_owned());

        let artifacts = ApiResourceHandler::new()
            .build(&m, &ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(artifacts.image_name.as_deref(), Some("todo:1.0.0"));

        let built = fake.built();
        assert_eq!(built.len(), 1);
        let dockerfile = built[0].dockerfile.clone().unwrap();
        assert!(dockerfile.ends_with(".Dockerfile"));
        assert!(!Path::new(&dockerfile).exists());
        assert!(ctx.take_logs().iter().any(|l| l.contains("Step 1/1")));
    }
}

//! Individual pipeline stages
//!
//! Each stage logs through its `StageContext` and returns `Err` to fail the run.

use std::time::Duration;

use crate::config::env::constants::DEFAULT_HOST_PORT;
use crate::domain::{
    Artifacts, ContainerConfig, DeployEvent, DeploymentTarget, ModuleDefinition,
    DOCKER_LOCAL_TARGET,
};
use crate::services::registry::ModuleHandler;

use super::context::StageContext;
use super::http_check::{check_once, join_url, run_http_test};
use super::StageError;

const DEFAULT_HEALTH_PATH: &str = "/health";
const DEFAULT_HEALTH_RETRIES: u32 = 10;
const DEFAULT_HEALTH_TIMEOUT_MS: u64 = 5000;
const DEFAULT_HEALTH_INTERVAL_MS: u64 = 1000;

pub(super) fn validate(
    handler: &dyn ModuleHandler,
    module: &ModuleDefinition,
    ctx: &StageContext<'_>,
) -> Result<(), StageError> {
    let result = handler.validate(module);
    for warning in &result.warnings {
        ctx.warn(warning);
    }
    if !result.valid {
        for error in &result.errors {
            ctx.error(error);
        }
        return Err(StageError::Validation(result.errors.join("; ")));
    }
    ctx.info(&format!("Module {}@{} is valid", module.name, module.version));
    Ok(())
}

pub(super) async fn build(
    handler: &dyn ModuleHandler,
    module: &ModuleDefinition,
    artifacts: &mut Artifacts,
    ctx: &StageContext<'_>,
) -> Result<(), StageError> {
    match handler.build(module, ctx).await {
        Some(built) => merge_artifacts(artifacts, built?),
        None => {
            let image = module.image_tag();
            ctx.info(&format!("Using prebuilt image {}", image));
            artifacts.image_name = Some(image);
        }
    }
    if let Some(image) = &artifacts.image_name {
        ctx.artifact("imageName", image);
    }
    Ok(())
}

pub(super) async fn deploy(
    handler: &dyn ModuleHandler,
    module: &ModuleDefinition,
    target: &DeploymentTarget,
    artifacts: &mut Artifacts,
    ctx: &StageContext<'_>,
) -> Result<(), StageError> {
    if let Some(deployed) = handler.deploy(module, target, artifacts, ctx).await {
        merge_artifacts(artifacts, deployed?);
        emit_deploy_artifacts(artifacts, ctx);
        return Ok(());
    }

    if target.target_type != DOCKER_LOCAL_TARGET {
        return Err(StageError::UnsupportedTarget(target.target_type.clone()));
    }

    let runtime = ctx.lifecycle.runtime();
    let image = artifacts
        .image_name
        .clone()
        .unwrap_or_else(|| module.image_tag());
    let name = module.container_name();

    match runtime.remove(&name, true).await {
        Ok(()) => ctx.info(&format!("Removed previous container {}", name)),
        Err(e) if e.is_not_found() => {}
        Err(e) => ctx.warn(&format!("Could not remove previous container {}: {}", name, e)),
    }

    let container_port = module.runtime.port.unwrap_or(DEFAULT_HOST_PORT);
    let host_port = target
        .host_port()
        .or(module.runtime.port)
        .unwrap_or(DEFAULT_HOST_PORT);

    let config = ContainerConfig::new(image.clone())
        .with_name(name.clone())
        .with_port(host_port, container_port)
        .with_env(module.runtime.env_pairs())
        .with_label("module.id", module.id.clone())
        .with_label("workload.id", ctx.workload_id);

    ctx.info(&format!(
        "Starting {} from {} on port {} -> {}",
        name, image, host_port, container_port
    ));
    let container_id = ctx.lifecycle.create(&config).await?;
    ctx.lifecycle.start(&container_id).await?;
    // 就绪等待使用生命周期默认值，健康检查的超时只用于单次 HTTP 请求
    ctx.lifecycle.wait_for_ready(&container_id, None).await?;
    ctx.info(&format!("Container {} is running", container_id));

    artifacts.container_id = Some(container_id);
    artifacts.container_name = Some(name);
    artifacts.port = Some(host_port);
    artifacts.url = Some(format!("http://{}:{}", ctx.public_host, host_port));
    emit_deploy_artifacts(artifacts, ctx);
    Ok(())
}

pub(super) async fn healthcheck(
    module: &ModuleDefinition,
    artifacts: &Artifacts,
    ctx: &StageContext<'_>,
) -> Result<(), StageError> {
    let base = artifacts
        .url
        .as_deref()
        .ok_or(StageError::MissingArtifact("url"))?;
    let config = module.runtime.healthcheck.clone().unwrap_or_default();
    let url = join_url(base, config.path.as_deref().unwrap_or(DEFAULT_HEALTH_PATH));
    let retries = config.retries.unwrap_or(DEFAULT_HEALTH_RETRIES).max(1);
    let timeout = Duration::from_millis(config.timeout.unwrap_or(DEFAULT_HEALTH_TIMEOUT_MS));
    let interval = Duration::from_millis(config.interval.unwrap_or(DEFAULT_HEALTH_INTERVAL_MS));

    for attempt in 1..=retries {
        match check_once(ctx.http, &url, timeout).await {
            Ok(true) => {
                ctx.info(&format!("Healthcheck passed: {} (attempt {})", url, attempt));
                return Ok(());
            }
            Ok(false) => ctx.warn(&format!(
                "Healthcheck attempt {}/{} got a non-2xx response",
                attempt, retries
            )),
            Err(e) => ctx.warn(&format!("Healthcheck attempt {}/{} failed: {}", attempt, retries, e)),
        }
        if attempt < retries {
            tokio::time::sleep(interval).await;
        }
    }
    Err(StageError::HealthcheckExhausted)
}

pub(super) async fn test(
    handler: &dyn ModuleHandler,
    module: &ModuleDefinition,
    artifacts: &Artifacts,
    ctx: &StageContext<'_>,
) -> Result<(), StageError> {
    let base = artifacts
        .url
        .as_deref()
        .ok_or(StageError::MissingArtifact("url"))?;
    let tests = handler.get_tests(module, artifacts);
    ctx.info(&format!("Running {} test(s)", tests.len()));

    let mut failures = Vec::new();
    let mut skipped = 0;
    for test in &tests {
        ctx.emit(DeployEvent::TestStart {
            workload_id: ctx.workload_id.to_string(),
            name: test.name.clone(),
        });

        if test.test_type != "http" {
            skipped += 1;
            ctx.warn(&format!(
                "Skipping test '{}': unsupported type '{}'",
                test.name, test.test_type
            ));
            ctx.emit(DeployEvent::TestComplete {
                workload_id: ctx.workload_id.to_string(),
                name: test.name.clone(),
                passed: false,
                skipped: true,
                error: None,
            });
            continue;
        }

        let outcome = run_http_test(ctx.http, base, &test.config).await;
        let error = outcome.err().map(|e| e.to_string());
        match &error {
            None => ctx.info(&format!("✓ {}", test.name)),
            Some(e) => {
                ctx.error(&format!("✗ {}: {}", test.name, e));
                failures.push(format!("{} ({})", test.name, e));
            }
        }
        ctx.emit(DeployEvent::TestComplete {
            workload_id: ctx.workload_id.to_string(),
            name: test.name.clone(),
            passed: error.is_none(),
            skipped: false,
            error,
        });
    }

    let passed = tests.len() - failures.len() - skipped;
    ctx.info(&format!(
        "{} passed, {} failed, {} skipped",
        passed,
        failures.len(),
        skipped
    ));
    if failures.is_empty() {
        Ok(())
    } else {
        Err(StageError::TestsFailed {
            failed: failures.len(),
            details: failures.join(", "),
        })
    }
}

pub(super) fn complete(module: &ModuleDefinition, artifacts: &Artifacts, ctx: &StageContext<'_>) {
    match &artifacts.url {
        Some(url) => ctx.info(&format!("{} deployed at {}", module.name, url)),
        None => ctx.info(&format!("{} deployed", module.name)),
    }
}

/// Copy the fields a hook filled in
fn merge_artifacts(artifacts: &mut Artifacts, update: Artifacts) {
    if update.image_name.is_some() {
        artifacts.image_name = update.image_name;
    }
    if update.container_id.is_some() {
        artifacts.container_id = update.container_id;
    }
    if update.container_name.is_some() {
        artifacts.container_name = update.container_name;
    }
    if update.port.is_some() {
        artifacts.port = update.port;
    }
    if update.url.is_some() {
        artifacts.url = update.url;
    }
}

fn emit_deploy_artifacts(artifacts: &Artifacts, ctx: &StageContext<'_>) {
    if let Some(id) = &artifacts.container_id {
        ctx.artifact("containerId", id);
    }
    if let Some(name) = &artifacts.container_name {
        ctx.artifact("containerName", name);
    }
    if let Some(port) = artifacts.port {
        ctx.artifact("port", port);
    }
    if let Some(url) = &artifacts.url {
        ctx.artifact("url", url);
    }
}

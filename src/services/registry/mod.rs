//! Module type registry
//!
//! Maps a module `type` to the handler that knows how to validate, build,
//! deploy and test it.

pub mod api_resource;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::{Artifacts, DeploymentTarget, ModuleDefinition, TestDefinition, ValidationResult};
use crate::services::pipeline::{StageContext, StageError};

pub use api_resource::ApiResourceHandler;

/// Result of an optional handler hook. `None` means "use the generic stage".
pub type HookOutcome = Option<Result<Artifacts, StageError>>;

/// Per-type behaviour plugged into the pipeline
#[async_trait]
pub trait ModuleHandler: Send + Sync {
    fn module_type(&self) -> &str;

    fn validate(&self, module: &ModuleDefinition) -> ValidationResult;

    fn generate_dockerfile(&self, _module: &ModuleDefinition) -> Option<String> {
        None
    }

    fn get_tests(&self, module: &ModuleDefinition, artifacts: &Artifacts) -> Vec<TestDefinition>;

    async fn build(&self, _module: &ModuleDefinition, _ctx: &StageContext<'_>) -> HookOutcome {
        None
    }

    async fn deploy(
        &self,
        _module: &ModuleDefinition,
        _target: &DeploymentTarget,
        _artifacts: &Artifacts,
        _ctx: &StageContext<'_>,
    ) -> HookOutcome {
        None
    }
}

/// type -> handler lookup
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ModuleHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in handlers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ApiResourceHandler::new()));
        registry
    }

    /// Register a handler, replacing any previous one for the same type
    pub fn register(&mut self, handler: Arc<dyn ModuleHandler>) -> Option<Arc<dyn ModuleHandler>> {
        let module_type = handler.module_type().to_string();
        tracing::debug!(module_type = %module_type, "Registered module handler");
        self.handlers.insert(module_type, handler)
    }

    pub fn get(&self, module_type: &str) -> Option<Arc<dyn ModuleHandler>> {
        self.handlers.get(module_type).cloned()
    }

    /// Registered types, sorted
    pub fn list(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}

//! 领域模型模块
//!
//! 纯数据结构，不依赖 axum/tokio

pub mod container;
pub mod event;
pub mod module;
pub mod workload;

// Re-exports for convenience
pub use container::{BuildOptions, ContainerConfig, ContainerState, PortBinding};
pub use event::{BusEvent, DeployEvent};
pub use module::{
    DeploymentTarget, HealthcheckConfig, HttpTestConfig, ModuleDefinition, RuntimeConfig,
    TestDefinition, TestExpectation, ValidationResult, DOCKER_LOCAL_TARGET,
};
pub use workload::{
    Artifacts, Deployment, LogLine, StageResult, StageStatus, Workload, WorkloadPhase,
    WorkloadStatus,
};

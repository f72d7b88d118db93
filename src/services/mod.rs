//! 服务层模块
//!
//! 包含核心业务逻辑：容器生命周期、模块类型注册表、阶段流水线和工作负载编排

pub mod lifecycle;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod registry;

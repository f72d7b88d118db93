//! 运行时状态模块
//!
//! 管理应用状态、记录存储、端口池、事件总线和日志通道

pub mod app_state;
pub mod event_bus;
pub mod log_hub;
pub mod port_pool;
pub mod store;

pub use app_state::AppState;
pub use event_bus::EventBus;
pub use log_hub::LogHub;
pub use port_pool::PortPool;
pub use store::{MemoryStore, WorkloadStore};

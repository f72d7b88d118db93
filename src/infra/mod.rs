//! 基础设施模块
//!
//! 封装外部依赖（docker 引擎、git、命令执行等）

pub mod command;
pub mod docker;
pub mod engine;
pub mod git;
pub mod log_demux;

pub use command::CommandRunner;
pub use docker::{
    monitor, ContainerRuntime, DockerCli, MonitorExit, MonitorHandle, ProgressFn, RuntimeError,
};
pub use git::{CloneError, GitCli, SourceFetcher};
pub use log_demux::LogDemuxer;

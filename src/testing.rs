//! 测试用的运行时与源码获取替身

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::{DockerConfig, EnvConfig};
use crate::domain::{BuildOptions, ContainerConfig, ContainerState};
use crate::infra::docker::{ContainerRuntime, ProgressFn, RuntimeError, RuntimeResult};
use crate::infra::git::{CloneError, SourceFetcher};

#[derive(Default)]
struct FakeState {
    states: HashMap<String, ContainerState>,
    names: HashMap<String, String>,
    calls: Vec<String>,
    failures: HashMap<&'static str, String>,
    created: Vec<ContainerConfig>,
    built: Vec<BuildOptions>,
    logs: String,
    stream_lines: Vec<String>,
    boot_inspects: u32,
    booting: HashMap<String, u32>,
    next_id: u32,
}

/// 内存中的容器运行时
#[derive(Default)]
pub struct FakeRuntime {
    inner: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut state = self.inner.lock().unwrap();
        f(&mut state)
    }

    /// 记录调用并检查预设失败
    fn record(&self, operation: &'static str, target: &str) -> RuntimeResult<()> {
        self.with_state(|s| {
            s.calls.push(format!("{}:{}", operation, target));
            match s.failures.get(operation) {
                Some(message) => Err(RuntimeError::new(operation, target, message.clone())),
                None => Ok(()),
            }
        })
    }

    fn resolve(&self, id_or_name: &str) -> String {
        self.with_state(|s| {
            s.names
                .get(id_or_name)
                .cloned()
                .unwrap_or_else(|| id_or_name.to_string())
        })
    }

    pub fn set_state(&self, id: &str, state: ContainerState) {
        self.with_state(|s| {
            s.states.insert(id.to_string(), state);
        });
    }

    /// 让某个操作始终失败
    pub fn fail_on(&self, operation: &'static str, message: &str) {
        self.with_state(|s| {
            s.failures.insert(operation, message.to_string());
        });
    }

    pub fn set_logs(&self, logs: &str) {
        self.with_state(|s| s.logs = logs.to_string());
    }

    pub fn set_stream_lines(&self, lines: Vec<String>) {
        self.with_state(|s| s.stream_lines = lines);
    }

    /// 启动后的前 n 次 inspect 报告容器尚未运行
    pub fn boot_after_inspects(&self, n: u32) {
        self.with_state(|s| s.boot_inspects = n);
    }

    pub fn calls(&self) -> Vec<String> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn created(&self) -> Vec<ContainerConfig> {
        self.with_state(|s| s.created.clone())
    }

    pub fn built(&self) -> Vec<BuildOptions> {
        self.with_state(|s| s.built.clone())
    }

    pub fn exists(&self, id: &str) -> bool {
        let id = self.resolve(id);
        self.with_state(|s| s.states.contains_key(&id))
    }
}

fn not_found(operation: &'static str, id: &str) -> RuntimeError {
    RuntimeError::new(operation, id, format!("Error: No such container: {}", id))
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create(&self, config: &ContainerConfig) -> RuntimeResult<String> {
        let target = config.name.clone().unwrap_or_else(|| config.image.clone());
        self.record("create", &target)?;
        Ok(self.with_state(|s| {
            s.next_id += 1;
            let id = format!("container-{}", s.next_id);
            s.states.insert(id.clone(), ContainerState::default());
            if let Some(name) = &config.name {
                s.names.insert(name.clone(), id.clone());
            }
            s.created.push(config.clone());
            id
        }))
    }

    async fn start(&self, id: &str) -> RuntimeResult<()> {
        self.record("start", id)?;
        let id = self.resolve(id);
        self.with_state(|s| match s.states.get_mut(&id) {
            Some(state) => {
                if s.boot_inspects > 0 {
                    *state = ContainerState::default();
                    s.booting.insert(id.clone(), s.boot_inspects);
                } else {
                    *state = ContainerState::running();
                }
                Ok(())
            }
            None => Err(not_found("start", &id)),
        })
    }

    async fn stop(&self, id: &str, _timeout: Duration) -> RuntimeResult<()> {
        self.record("stop", id)?;
        let id = self.resolve(id);
        self.with_state(|s| match s.states.get_mut(&id) {
            Some(state) => {
                *state = ContainerState::exited(0);
                Ok(())
            }
            None => Err(not_found("stop", &id)),
        })
    }

    async fn kill(&self, id: &str) -> RuntimeResult<()> {
        self.record("kill", id)?;
        let id = self.resolve(id);
        self.with_state(|s| match s.states.get_mut(&id) {
            Some(state) => {
                *state = ContainerState::exited(137);
                Ok(())
            }
            None => Err(not_found("kill", &id)),
        })
    }

    async fn remove(&self, id: &str, _force: bool) -> RuntimeResult<()> {
        self.record("remove", id)?;
        let id = self.resolve(id);
        self.with_state(|s| match s.states.remove(&id) {
            Some(_) => {
                s.names.retain(|_, v| v != &id);
                Ok(())
            }
            None => Err(not_found("remove", &id)),
        })
    }

    async fn inspect(&self, id: &str) -> RuntimeResult<ContainerState> {
        self.record("inspect", id)?;
        let id = self.resolve(id);
        self.with_state(|s| {
            let booted = match s.booting.get_mut(&id) {
                Some(0) => true,
                Some(left) => {
                    *left -= 1;
                    false
                }
                None => false,
            };
            if booted {
                s.booting.remove(&id);
                s.states.insert(id.clone(), ContainerState::running());
            }
            s.states.get(&id).cloned()
        })
        .ok_or_else(|| not_found("inspect", &id))
    }

    async fn logs(&self, id: &str) -> RuntimeResult<String> {
        self.record("logs", id)?;
        Ok(self.with_state(|s| s.logs.clone()))
    }

    async fn stream_logs(
        &self,
        id: &str,
        on_line: &mut (dyn FnMut(String) + Send),
        cancel: &CancellationToken,
    ) -> RuntimeResult<()> {
        self.record("stream_logs", id)?;
        let lines = self.with_state(|s| s.stream_lines.clone());
        for line in lines {
            if cancel.is_cancelled() {
                break;
            }
            on_line(line);
        }
        Ok(())
    }

    async fn build_image(
        &self,
        _context: &Path,
        options: &BuildOptions,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> RuntimeResult<String> {
        self.record("build", &options.tag)?;
        if let Some(progress) = on_progress {
            progress("Step 1/1 : FROM node:20-alpine");
        }
        self.with_state(|s| s.built.push(options.clone()));
        Ok(format!("sha256:{}", options.tag))
    }

    async fn pull_image(&self, name: &str) -> RuntimeResult<()> {
        self.record("pull", name)
    }

    async fn remove_image(&self, name: &str, _force: bool) -> RuntimeResult<()> {
        self.record("remove_image", name)
    }
}

/// 把预设文件写入目标目录的源码获取替身
#[derive(Default)]
pub struct FakeFetcher {
    files: Vec<(String, String)>,
    failure: Option<String>,
}

impl FakeFetcher {
    /// `files`: (相对路径, 内容)
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
            failure: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            files: Vec::new(),
            failure: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn clone_repo(&self, _repo_url: &str, dest: &Path) -> Result<(), CloneError> {
        if let Some(message) = &self.failure {
            return Err(CloneError::Failed(message.clone()));
        }
        for (path, content) in &self.files {
            let full = dest.join(path);
            if let Some(parent) = full.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| CloneError::Failed(e.to_string()))?;
            }
            tokio::fs::write(&full, content)
                .await
                .map_err(|e| CloneError::Failed(e.to_string()))?;
        }
        Ok(())
    }
}

/// 测试用配置：固定密钥、小端口区间、临时工作目录
pub fn test_config(work_root: &Path) -> EnvConfig {
    EnvConfig {
        api_key: "test-key".to_string(),
        port: 0,
        workload_port_min: 4100,
        workload_port_max: 4101,
        work_root: work_root.to_path_buf(),
        docker: DockerConfig::default(),
        git_bin: "git".to_string(),
        public_host: "127.0.0.1".to_string(),
    }
}

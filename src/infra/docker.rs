//! 容器运行时
//!
//! `ContainerRuntime` 抽象容器与镜像操作，`DockerCli` 通过 docker CLI 实现。
//! 所有失败都包装为带操作名和目标的 `RuntimeError`。

use async_trait::async_trait;
use std::collections::VecDeque;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::env::constants::{BUILD_TIMEOUT_SECS, DOCKER_COMMAND_TIMEOUT_SECS};
use crate::config::DockerConfig;
use crate::domain::{BuildOptions, ContainerConfig, ContainerState};

use super::command::{combined_output, CommandRunner};
use super::engine;
use super::log_demux::demux_stream;

/// 构建失败时错误信息中保留的输出行数
const BUILD_ERROR_TAIL_LINES: usize = 20;

/// 容器运行时错误
#[derive(Debug, Clone, thiserror::Error)]
#[error("container runtime {operation} failed for '{target}': {message}")]
pub struct RuntimeError {
    /// 操作名（create, start, stop ...）
    pub operation: &'static str,
    /// 容器 / 镜像 ID 或名称
    pub target: String,
    pub message: String,
}

impl RuntimeError {
    pub fn new(operation: &'static str, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation,
            target: target.into(),
            message: message.into(),
        }
    }

    /// 目标不存在（已被删除）
    pub fn is_not_found(&self) -> bool {
        let message = self.message.to_lowercase();
        message.contains("no such container")
            || message.contains("no such image")
            || message.contains("not found")
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// 构建进度回调（逐行）
pub type ProgressFn<'p> = dyn for<'a> Fn(&'a str) + Send + Sync + 'p;

/// 容器运行时抽象
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// 创建容器，返回容器 ID
    async fn create(&self, config: &ContainerConfig) -> RuntimeResult<String>;

    async fn start(&self, id: &str) -> RuntimeResult<()>;

    /// 发送 SIGTERM，超时后由引擎强制结束
    async fn stop(&self, id: &str, timeout: Duration) -> RuntimeResult<()>;

    async fn kill(&self, id: &str) -> RuntimeResult<()>;

    async fn remove(&self, id: &str, force: bool) -> RuntimeResult<()>;

    async fn inspect(&self, id: &str) -> RuntimeResult<ContainerState>;

    /// 获取目前为止的全部日志（stdout + stderr）
    async fn logs(&self, id: &str) -> RuntimeResult<String>;

    /// 跟随日志流，直到容器退出或取消
    async fn stream_logs(
        &self,
        id: &str,
        on_line: &mut (dyn FnMut(String) + Send),
        cancel: &CancellationToken,
    ) -> RuntimeResult<()>;

    /// 构建镜像，返回镜像 ID
    async fn build_image(
        &self,
        context: &Path,
        options: &BuildOptions,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> RuntimeResult<String>;

    async fn pull_image(&self, name: &str) -> RuntimeResult<()>;

    async fn remove_image(&self, name: &str, force: bool) -> RuntimeResult<()>;
}

/// 基于 docker CLI 的运行时实现
pub struct DockerCli {
    config: DockerConfig,
    command_timeout: Duration,
}

impl DockerCli {
    pub fn new(config: DockerConfig) -> Self {
        Self {
            config,
            command_timeout: Duration::from_secs(DOCKER_COMMAND_TIMEOUT_SECS),
        }
    }

    /// 执行 docker 子命令，返回去除空白的 stdout
    async fn docker(
        &self,
        operation: &'static str,
        target: &str,
        args: Vec<String>,
        timeout: Duration,
    ) -> RuntimeResult<String> {
        debug!(operation, target, ?args, "Running docker command");
        let output = CommandRunner::run_simple(&self.config.docker_bin, &args, None, timeout)
            .await
            .map_err(|e| RuntimeError::new(operation, target, e.to_string()))?;

        if !output.status.success() {
            return Err(RuntimeError::new(operation, target, combined_output(&output)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// 生成 `docker create` 参数
pub fn create_args(config: &ContainerConfig) -> Vec<String> {
    let mut args = vec!["create".to_string()];
    if let Some(name) = &config.name {
        args.push("--name".to_string());
        args.push(name.clone());
    }
    for port in &config.ports {
        args.push("-p".to_string());
        args.push(port.to_arg());
    }
    for env in &config.env {
        args.push("-e".to_string());
        args.push(env.clone());
    }
    let mut labels: Vec<_> = config.labels.iter().collect();
    labels.sort();
    for (key, value) in labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }
    args.push(config.image.clone());
    args.extend(config.cmd.iter().cloned());
    args
}

/// 生成 `docker build` 参数
pub fn build_args(context: &Path, options: &BuildOptions) -> Vec<String> {
    let mut args = vec![
        "build".to_string(),
        "--progress=plain".to_string(),
        "-t".to_string(),
        options.tag.clone(),
    ];
    if let Some(dockerfile) = &options.dockerfile {
        args.push("-f".to_string());
        args.push(context.join(dockerfile).to_string_lossy().to_string());
    }
    let mut build_args: Vec<_> = options.build_args.iter().collect();
    build_args.sort();
    for (key, value) in build_args {
        args.push("--build-arg".to_string());
        args.push(format!("{}={}", key, value));
    }
    args.push(context.to_string_lossy().to_string());
    args
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn create(&self, config: &ContainerConfig) -> RuntimeResult<String> {
        let target = config.name.clone().unwrap_or_else(|| config.image.clone());
        let id = self
            .docker("create", &target, create_args(config), self.command_timeout)
            .await?;
        info!(container_id = %id, image = %config.image, "Container created");
        Ok(id)
    }

    async fn start(&self, id: &str) -> RuntimeResult<()> {
        self.docker("start", id, vec!["start".into(), id.into()], self.command_timeout)
            .await
            .map(|_| ())
    }

    async fn stop(&self, id: &str, timeout: Duration) -> RuntimeResult<()> {
        let args = vec![
            "stop".into(),
            "-t".into(),
            timeout.as_secs().to_string(),
            id.into(),
        ];
        self.docker("stop", id, args, timeout + self.command_timeout)
            .await
            .map(|_| ())
    }

    async fn kill(&self, id: &str) -> RuntimeResult<()> {
        self.docker("kill", id, vec!["kill".into(), id.into()], self.command_timeout)
            .await
            .map(|_| ())
    }

    async fn remove(&self, id: &str, force: bool) -> RuntimeResult<()> {
        let mut args = vec!["rm".to_string()];
        if force {
            args.push("-f".into());
        }
        args.push(id.into());
        self.docker("remove", id, args, self.command_timeout)
            .await
            .map(|_| ())
    }

    async fn inspect(&self, id: &str) -> RuntimeResult<ContainerState> {
        let args = vec![
            "inspect".into(),
            "--format".into(),
            "{{json .State}}".into(),
            id.into(),
        ];
        let json = self.docker("inspect", id, args, self.command_timeout).await?;
        serde_json::from_str(&json)
            .map_err(|e| RuntimeError::new("inspect", id, format!("invalid state JSON: {}", e)))
    }

    async fn logs(&self, id: &str) -> RuntimeResult<String> {
        let args = vec!["logs".to_string(), id.to_string()];
        let output = CommandRunner::run_simple(&self.config.docker_bin, &args, None, self.command_timeout)
            .await
            .map_err(|e| RuntimeError::new("logs", id, e.to_string()))?;

        // docker logs 把容器的 stderr 写到自己的 stderr
        let text = combined_output(&output);
        if !output.status.success() {
            return Err(RuntimeError::new("logs", id, text));
        }
        Ok(text)
    }

    async fn stream_logs(
        &self,
        id: &str,
        on_line: &mut (dyn FnMut(String) + Send),
        cancel: &CancellationToken,
    ) -> RuntimeResult<()> {
        // 引擎 API 返回未拆分的多路复用流，docker CLI 则已拆分
        let path = format!("/containers/{}/logs?follow=1&stdout=1&stderr=1", id);
        let socket = Path::new(&self.config.socket_path);
        let stream = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            stream = engine::get(socket, &path) => {
                stream.map_err(|e| RuntimeError::new("stream_logs", id, e.to_string()))?
            }
        };

        let (reader, _connection) = stream.into_reader();
        demux_stream(reader, on_line, cancel)
            .await
            .map_err(|e| RuntimeError::new("stream_logs", id, e.to_string()))
    }

    async fn build_image(
        &self,
        context: &Path,
        options: &BuildOptions,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> RuntimeResult<String> {
        let tail = Mutex::new(VecDeque::with_capacity(BUILD_ERROR_TAIL_LINES));
        let on_line = |line: &str| {
            if let Ok(mut tail) = tail.lock() {
                if tail.len() == BUILD_ERROR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line.to_string());
            }
            if let Some(progress) = on_progress {
                progress(line);
            }
        };

        info!(tag = %options.tag, context = %context.display(), "Building image");
        let result = CommandRunner::run_with_streaming(
            &self.config.docker_bin,
            &build_args(context, options),
            None,
            &on_line,
            &CancellationToken::new(),
            Duration::from_secs(BUILD_TIMEOUT_SECS),
        )
        .await
        .map_err(|e| RuntimeError::new("build", &options.tag, e.to_string()))?;

        if result.timed_out {
            return Err(RuntimeError::new("build", &options.tag, "build timed out"));
        }
        if !result.status.success() {
            let output: Vec<String> = tail
                .into_inner()
                .map(|t| t.into_iter().collect())
                .unwrap_or_default();
            return Err(RuntimeError::new("build", &options.tag, output.join("\n")));
        }

        let args = vec![
            "image".into(),
            "inspect".into(),
            "--format".into(),
            "{{.Id}}".into(),
            options.tag.clone(),
        ];
        self.docker("build", &options.tag, args, self.command_timeout).await
    }

    async fn pull_image(&self, name: &str) -> RuntimeResult<()> {
        self.docker(
            "pull",
            name,
            vec!["pull".into(), name.into()],
            Duration::from_secs(BUILD_TIMEOUT_SECS),
        )
        .await
        .map(|_| ())
    }

    async fn remove_image(&self, name: &str, force: bool) -> RuntimeResult<()> {
        let mut args = vec!["rmi".to_string()];
        if force {
            args.push("-f".into());
        }
        args.push(name.into());
        self.docker("remove_image", name, args, self.command_timeout)
            .await
            .map(|_| ())
    }
}

/// 监控结束原因
#[derive(Debug, Clone)]
pub enum MonitorExit {
    /// 容器已不在运行
    Exited(ContainerState),
    /// inspect 失败
    InspectFailed(RuntimeError),
}

/// 监控任务句柄
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// 停止轮询，不再触发回调
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// 每隔 `interval` 检查一次容器状态，容器不再运行时调用 `on_exit` 并结束
pub fn monitor<F, Fut>(
    runtime: Arc<dyn ContainerRuntime>,
    container_id: String,
    interval: Duration,
    on_exit: F,
) -> MonitorHandle
where
    F: FnOnce(MonitorExit) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let task = tokio::spawn(async move {
        let exit = loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }

            match runtime.inspect(&container_id).await {
                Ok(state) if state.running => {
                    debug!(container_id = %container_id, "Container still running");
                }
                Ok(state) => break MonitorExit::Exited(state),
                Err(e) => {
                    warn!(container_id = %container_id, error = %e, "Container inspect failed");
                    break MonitorExit::InspectFailed(e);
                }
            }
        };

        if token.is_cancelled() {
            return;
        }
        on_exit(exit).await;
    });

    MonitorHandle { cancel, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;
    use std::path::PathBuf;
    use tokio::sync::oneshot;

    #[test]
    fn test_create_args() {
        let config = ContainerConfig::new("todo:1.0")
            .with_name("module-todo")
            .with_port(4001, 3000)
            .with_env(vec!["A=1".into()])
            .with_label("managed-by", "module-deploy-agent");

        assert_eq!(
            create_args(&config),
            vec![
                "create",
                "--name",
                "module-todo",
                "-p",
                "4001:3000",
                "-e",
                "A=1",
                "--label",
                "managed-by=module-deploy-agent",
                "todo:1.0",
            ]
        );
    }

    #[test]
    fn test_build_args() {
        let mut options = BuildOptions::new("workload-1");
        options.dockerfile = Some("Dockerfile.gen".into());
        options.build_args.insert("NODE_ENV".into(), "production".into());

        let args = build_args(&PathBuf::from("/tmp/ctx"), &options);
        assert_eq!(
            args,
            vec![
                "build",
                "--progress=plain",
                "-t",
                "workload-1",
                "-f",
                "/tmp/ctx/Dockerfile.gen",
                "--build-arg",
                "NODE_ENV=production",
                "/tmp/ctx",
            ]
        );
    }

    #[test]
    fn test_runtime_error_context() {
        let err = RuntimeError::new("stop", "abc123", "Error: No such container: abc123");
        assert!(err.is_not_found());
        let text = err.to_string();
        assert!(text.contains("stop"));
        assert!(text.contains("abc123"));
    }

    #[tokio::test]
    async fn test_missing_docker_binary_is_runtime_error() {
        let docker = DockerCli::new(DockerConfig {
            docker_bin: "/nonexistent/docker-binary".to_string(),
            ..Default::default()
        });

        let err = docker.pull_image("node:20-alpine").await.unwrap_err();
        assert_eq!(err.operation, "pull");
        assert_eq!(err.target, "node:20-alpine");

        let err = docker.inspect("abc123").await.unwrap_err();
        assert_eq!(err.target, "abc123");
    }

    fn frame(stream: u8, payload: &str) -> Vec<u8> {
        let mut bytes = vec![stream, 0, 0, 0];
        bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(payload.as_bytes());
        bytes
    }

    /// 在 unix socket 上应答一次请求，返回收到的请求头
    #[cfg(unix)]
    fn fake_engine(
        socket: &Path,
        status: &str,
        body: Vec<u8>,
    ) -> tokio::task::JoinHandle<String> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::UnixListener::bind(socket).unwrap();
        let head = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/vnd.docker.raw-stream\r\nContent-Length: {}\r\n\r\n",
            status,
            body.len()
        );
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            stream.write_all(head.as_bytes()).await.unwrap();
            stream.write_all(&body).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        })
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_logs_demuxes_engine_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("docker.sock");
        let mut body = frame(1, "listening on 3000\n");
        body.extend(frame(2, "warning: slow start\n"));
        let engine = fake_engine(&socket, "200 OK", body);

        let docker = DockerCli::new(DockerConfig {
            socket_path: socket.to_string_lossy().into_owned(),
            ..Default::default()
        });
        let mut lines = Vec::new();
        let mut on_line = |line: String| lines.push(line);
        docker
            .stream_logs("abc123", &mut on_line, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(lines, vec!["listening on 3000", "warning: slow start"]);
        let request = engine.await.unwrap();
        assert!(request.starts_with("GET /containers/abc123/logs?follow=1&stdout=1&stderr=1 "));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_logs_reports_engine_errors() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("docker.sock");
        let engine = fake_engine(
            &socket,
            "404 Not Found",
            br#"{"message":"No such container: ghost"}"#.to_vec(),
        );

        let docker = DockerCli::new(DockerConfig {
            socket_path: socket.to_string_lossy().into_owned(),
            ..Default::default()
        });
        let mut on_line = |_: String| {};
        let err = docker
            .stream_logs("ghost", &mut on_line, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.operation, "stream_logs");
        assert!(err.is_not_found(), "{}", err);
        engine.await.unwrap();

        let missing = DockerCli::new(DockerConfig {
            socket_path: dir.path().join("absent.sock").to_string_lossy().into_owned(),
            ..Default::default()
        });
        let err = missing
            .stream_logs("abc123", &mut on_line, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.message.contains("cannot connect"), "{}", err);
    }

    #[tokio::test]
    async fn test_monitor_reports_exit() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_state("c-1", ContainerState::running());

        let (tx, rx) = oneshot::channel();
        let _handle = monitor(
            runtime.clone(),
            "c-1".into(),
            Duration::from_millis(10),
            move |exit| async move {
                let _ = tx.send(exit);
            },
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        runtime.set_state("c-1", ContainerState::exited(3));

        match tokio::time::timeout(Duration::from_secs(2), rx).await {
            Ok(Ok(MonitorExit::Exited(state))) => assert_eq!(state.exit_code, 3),
            other => panic!("unexpected monitor result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_monitor_cancel_suppresses_callback() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_state("c-1", ContainerState::running());

        let (tx, mut rx) = oneshot::channel::<MonitorExit>();
        let handle = monitor(
            runtime.clone(),
            "c-1".into(),
            Duration::from_millis(10),
            move |exit| async move {
                let _ = tx.send(exit);
            },
        );
        handle.cancel();
        runtime.set_state("c-1", ContainerState::exited(0));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_finished());
        assert!(rx.try_recv().is_err());
    }
}

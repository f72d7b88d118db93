//! 命令执行器
//!
//! 提供统一的命令执行接口，支持：
//! - 实时输出回调（stdout/stderr 合并为行）
//! - 超时控制
//! - 取消支持

use std::path::Path;
use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// 命令执行器
pub struct CommandRunner;

/// 命令执行错误
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// 命令启动失败
    #[error("Failed to spawn command: {0}")]
    SpawnFailed(#[source] std::io::Error),
    /// 命令超时
    #[error("Command timed out")]
    Timeout,
    /// 命令被取消
    #[error("Command was cancelled")]
    Cancelled,
    /// 等待命令完成失败
    #[error("Failed to wait for command: {0}")]
    WaitFailed(#[source] std::io::Error),
}

/// 命令执行结果
pub struct CommandResult {
    /// 退出状态
    pub status: ExitStatus,
    /// 是否因超时而终止
    pub timed_out: bool,
}

impl CommandRunner {
    /// 执行命令并逐行回调输出
    ///
    /// stdout 与 stderr 的行按到达顺序交给 `on_line`
    pub async fn run_with_streaming(
        program: &str,
        args: &[String],
        work_dir: Option<&Path>,
        on_line: &(dyn Fn(&str) + Send + Sync),
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<CommandResult, CommandError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = work_dir {
            command.current_dir(dir);
        }
        let mut child = command.spawn().map_err(CommandError::SpawnFailed)?;

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
        let stdout_task = spawn_line_reader(child.stdout.take(), line_tx.clone());
        let stderr_task = spawn_line_reader(child.stderr.take(), line_tx);

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        // 等待命令完成，支持超时和取消
        let result = loop {
            tokio::select! {
                Some(line) = line_rx.recv() => on_line(&line),
                _ = cancel.cancelled() => {
                    warn!(program, "Command cancelled, killing process");
                    let _ = child.kill().await;
                    break Err(CommandError::Cancelled);
                }
                _ = &mut deadline => {
                    error!(program, "Command timed out after {:?}", timeout);
                    let _ = child.kill().await;
                    // 等待进程实际终止
                    let status = child.wait().await.map_err(CommandError::WaitFailed)?;
                    break Ok(CommandResult { status, timed_out: true });
                }
                status = child.wait() => {
                    let status = status.map_err(CommandError::WaitFailed)?;
                    break Ok(CommandResult { status, timed_out: false });
                }
            }
        };

        // 等待日志读取完成，再把剩余的行交出去
        let _ = stdout_task.await;
        let _ = stderr_task.await;
        while let Ok(line) = line_rx.try_recv() {
            on_line(&line);
        }

        result
    }

    /// 执行简单命令（无流式输出）
    pub async fn run_simple(
        program: &str,
        args: &[String],
        work_dir: Option<&Path>,
        timeout: Duration,
    ) -> Result<Output, CommandError> {
        let mut command = Command::new(program);
        command.args(args).kill_on_drop(true);
        if let Some(dir) = work_dir {
            command.current_dir(dir);
        }

        tokio::select! {
            result = command.output() => {
                result.map_err(CommandError::SpawnFailed)
            }
            _ = tokio::time::sleep(timeout) => {
                Err(CommandError::Timeout)
            }
        }
    }
}

/// 把管道按行转发到通道
fn spawn_line_reader<R>(
    pipe: Option<R>,
    tx: mpsc::UnboundedSender<String>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Some(pipe) = pipe {
            let mut lines = BufReader::new(pipe).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).is_err() {
                    break;
                }
            }
        }
    })
}

/// 合并 stdout 与 stderr 文本（去除首尾空白）
pub fn combined_output(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let mut text = stdout.trim().to_string();
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(stderr);
    }
    text
}

//! 引擎 socket 客户端
//!
//! 通过 unix socket 直接向 docker 引擎发送 HTTP 请求，读取 CLI 不提供的原始多路复用日志流

use futures::TryStreamExt;
use http_body_util::{BodyExt, Empty};
use hyper::body::{Bytes, Incoming};
use hyper::{header, Request};
use hyper_util::rt::TokioIo;
use std::io;
use std::path::Path;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_util::io::StreamReader;
use tracing::debug;

/// 引擎请求错误
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("cannot connect to engine socket {path}: {source}")]
    Connect {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("engine request failed: {0}")]
    Http(#[from] hyper::Error),
    #[error("invalid engine request: {0}")]
    Request(#[from] hyper::http::Error),
    #[error("engine returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("engine socket is not supported on this platform")]
    Unsupported,
}

/// 流式响应体
///
/// drop 时结束底层连接
pub struct EngineStream {
    body: Incoming,
    connection: ConnectionGuard,
}

impl EngineStream {
    /// 把响应体转换为字节流 reader
    pub fn into_reader(self) -> (impl AsyncRead + Unpin, ConnectionGuard) {
        let stream = self
            .body
            .into_data_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        (StreamReader::new(Box::pin(stream)), self.connection)
    }
}

/// 持有连接任务，drop 时中止
pub struct ConnectionGuard(JoinHandle<()>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// 对引擎发送 GET 请求，返回成功响应的流式响应体
#[cfg(unix)]
pub async fn get(socket: &Path, path_and_query: &str) -> Result<EngineStream, EngineError> {
    let stream = tokio::net::UnixStream::connect(socket)
        .await
        .map_err(|source| EngineError::Connect {
            path: socket.display().to_string(),
            source,
        })?;

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
    let connection = ConnectionGuard(tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "Engine connection closed with error");
        }
    }));

    let request = Request::get(path_and_query)
        .header(header::HOST, "docker")
        .body(Empty::<Bytes>::new())?;
    let response = sender.send_request(request).await?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .into_body()
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .unwrap_or_default();
        return Err(EngineError::Status {
            status: status.as_u16(),
            message: error_message(&body),
        });
    }

    Ok(EngineStream {
        body: response.into_body(),
        connection,
    })
}

#[cfg(not(unix))]
pub async fn get(_socket: &Path, _path_and_query: &str) -> Result<EngineStream, EngineError> {
    Err(EngineError::Unsupported)
}

/// 引擎错误响应体为 `{"message": "..."}`
fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string())
}

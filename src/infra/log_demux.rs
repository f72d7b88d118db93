//! 容器日志流解复用
//!
//! 引擎在非 TTY 容器上返回的 stdout/stderr 合并流由若干帧组成：
//! 8 字节头部 + 负载，头部后 4 字节是大端序的负载长度。

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

/// 帧头长度
pub const FRAME_HEADER_LEN: usize = 8;

/// 单次读取缓冲区大小
const READ_CHUNK_SIZE: usize = 8192;

/// 帧缓冲解复用器
///
/// 不完整的帧保留在缓冲区，等待后续字节
#[derive(Debug, Default)]
pub struct LogDemuxer {
    buffer: Vec<u8>,
}

impl LogDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加字节并取出所有完整帧对应的日志行
    ///
    /// 负载按 UTF-8（有损）解码并去除首尾空白，空行丢弃
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut offset = 0;
        while self.buffer.len() - offset >= FRAME_HEADER_LEN {
            let header = &self.buffer[offset..offset + FRAME_HEADER_LEN];
            let payload_len =
                u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
            let frame_end = offset + FRAME_HEADER_LEN + payload_len;
            if self.buffer.len() < frame_end {
                break;
            }

            let payload = &self.buffer[offset + FRAME_HEADER_LEN..frame_end];
            let text = String::from_utf8_lossy(payload);
            let text = text.trim();
            if !text.is_empty() {
                lines.push(text.to_string());
            }
            offset = frame_end;
        }

        if offset > 0 {
            self.buffer.drain(..offset);
        }
        lines
    }

    /// 缓冲区中尚未消费的字节数
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// 读取合并流直到 EOF 或取消
///
/// 取消时立即返回 `Ok(())`
pub async fn demux_stream<R>(
    mut reader: R,
    on_line: &mut (dyn FnMut(String) + Send),
    cancel: &CancellationToken,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut demuxer = LogDemuxer::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = reader.read(&mut chunk) => read?,
        };
        if read == 0 {
            return Ok(());
        }
        for line in demuxer.push(&chunk[..read]) {
            if cancel.is_cancelled() {
                return Ok(());
            }
            on_line(line);
        }
    }
}

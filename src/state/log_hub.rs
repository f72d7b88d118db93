//! 日志通道管理
//!
//! 管理运行中工作负载的日志广播通道，支持 SSE 订阅和自动清理

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

use crate::domain::LogLine;

/// 日志通道容量
const LOG_CHANNEL_CAPACITY: usize = 256;

/// 日志通道信息
struct LogChannel {
    sender: broadcast::Sender<LogLine>,
    finished_at: Option<DateTime<Utc>>,
}

/// 日志中心
///
/// 每个工作负载一个广播通道（workload_id -> LogChannel）
pub struct LogHub {
    channels: RwLock<HashMap<String, LogChannel>>,
}

impl LogHub {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// 创建日志通道
    ///
    /// 已存在时返回现有发送者，并把完成标记复位（同一工作负载再次启动）
    pub async fn create(&self, workload_id: &str) -> broadcast::Sender<LogLine> {
        let mut channels = self.channels.write().await;

        if let Some(channel) = channels.get_mut(workload_id) {
            channel.finished_at = None;
            return channel.sender.clone();
        }

        let (sender, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        channels.insert(
            workload_id.to_string(),
            LogChannel {
                sender: sender.clone(),
                finished_at: None,
            },
        );

        sender
    }

    /// 向通道推送一行日志，返回接收者数量（通道不存在时为 0）
    pub async fn publish(&self, workload_id: &str, line: LogLine) -> usize {
        let channels = self.channels.read().await;
        channels
            .get(workload_id)
            .and_then(|c| c.sender.send(line).ok())
            .unwrap_or(0)
    }

    /// 订阅日志通道，通道不存在返回 None
    pub async fn subscribe(&self, workload_id: &str) -> Option<broadcast::Receiver<LogLine>> {
        let channels = self.channels.read().await;
        channels.get(workload_id).map(|c| c.sender.subscribe())
    }

    /// 标记通道完成
    ///
    /// 通道完成后，SSE 客户端应收到完成事件并关闭连接
    pub async fn finish(&self, workload_id: &str) {
        let mut channels = self.channels.write().await;
        if let Some(channel) = channels.get_mut(workload_id) {
            channel.finished_at = Some(Utc::now());
        }
    }

    /// 通道不存在也视为已完成
    pub async fn is_finished(&self, workload_id: &str) -> bool {
        let channels = self.channels.read().await;
        channels.get(workload_id).map_or(true, |c| c.finished_at.is_some())
    }

    pub async fn exists(&self, workload_id: &str) -> bool {
        let channels = self.channels.read().await;
        channels.contains_key(workload_id)
    }

    /// 移除完成超过 `retention` 且没有活跃订阅者的通道，返回移除数量
    pub async fn cleanup(&self, retention: Duration) -> usize {
        let now = Utc::now();
        let mut channels = self.channels.write().await;
        let before = channels.len();
        channels.retain(|_, channel| match channel.finished_at {
            Some(at) => now - at < retention || channel.sender.receiver_count() > 0,
            None => true,
        });
        before - channels.len()
    }

    /// 未完成的通道数量
    pub async fn active_count(&self) -> usize {
        let channels = self.channels.read().await;
        channels.values().filter(|c| c.finished_at.is_none()).count()
    }
}

impl Default for LogHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_subscribe() {
        let hub = LogHub::new();

        hub.create("wl-1").await;
        assert!(hub.exists("wl-1").await);

        let mut receiver = hub.subscribe("wl-1").await.unwrap();
        assert_eq!(hub.publish("wl-1", LogLine::info("Hello")).await, 1);

        let line = receiver.recv().await.unwrap();
        assert_eq!(line.content, "Hello");
        assert_eq!(line.level, "info");
    }

    #[tokio::test]
    async fn test_publish_without_channel_is_noop() {
        let hub = LogHub::new();
        assert_eq!(hub.publish("missing", LogLine::warn("dropped")).await, 0);
        assert!(hub.subscribe("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_finish_and_cleanup() {
        let hub = LogHub::new();

        hub.create("wl-1").await;
        assert!(!hub.is_finished("wl-1").await);

        hub.finish("wl-1").await;
        assert!(hub.is_finished("wl-1").await);
        assert_eq!(hub.active_count().await, 0);

        assert_eq!(hub.cleanup(Duration::hours(1)).await, 0);
        assert_eq!(hub.cleanup(Duration::zero()).await, 1);
        assert!(!hub.exists("wl-1").await);
    }

    #[tokio::test]
    async fn test_cleanup_preserves_active_subscribers() {
        let hub = LogHub::new();

        hub.create("wl-1").await;
        let _receiver = hub.subscribe("wl-1").await;

        hub.finish("wl-1").await;
        hub.cleanup(Duration::zero()).await;

        assert!(hub.exists("wl-1").await);
    }

    #[tokio::test]
    async fn test_recreate_reopens_finished_channel() {
        let hub = LogHub::new();

        hub.create("wl-1").await;
        hub.finish("wl-1").await;
        hub.create("wl-1").await;

        assert!(!hub.is_finished("wl-1").await);
        assert_eq!(hub.active_count().await, 1);
        assert_eq!(hub.cleanup(Duration::zero()).await, 0);
    }
}

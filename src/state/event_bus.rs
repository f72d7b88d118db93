//! 事件总线
//!
//! 进程内发布/订阅，把工作负载状态变更桥接给外部消费者（CLI、SSE 推送）。
//! 发布是同步的，依次调用当前所有订阅者。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;

use crate::domain::BusEvent;

/// 订阅 ID
pub type SubscriptionId = u64;

type Callback = Arc<dyn Fn(&BusEvent) + Send + Sync>;

/// 事件总线
pub struct EventBus {
    subscribers: RwLock<Vec<(SubscriptionId, Callback)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// 注册回调
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        id
    }

    /// 注销回调，返回是否存在
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        subscribers.len() != before
    }

    /// 同步分发给当前所有订阅者，返回通知数量
    ///
    /// 分发前复制订阅者列表，回调中可以安全地订阅/注销
    pub fn publish(&self, event: &BusEvent) -> usize {
        let callbacks: Vec<Callback> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();

        for callback in &callbacks {
            callback(event);
        }
        callbacks.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 以通道形式订阅（SSE 桥接使用）
    ///
    /// 返回的 `Subscription` 被 drop 时自动注销
    pub fn subscribe_channel(self: &Arc<Self>) -> (mpsc::UnboundedReceiver<BusEvent>, Subscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        (
            rx,
            Subscription {
                bus: Arc::clone(self),
                id,
            },
        )
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// 自动注销的订阅
pub struct Subscription {
    bus: Arc<EventBus>,
    id: SubscriptionId,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

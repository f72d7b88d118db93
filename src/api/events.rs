//! 事件推送 API
//!
//! GET /events：事件总线的 SSE 桥接

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use std::{convert::Infallible, sync::Arc, time::Duration};

use crate::state::app_state::get_shutdown_token;
use crate::state::AppState;

/// 创建事件路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/events", get(stream_events))
}

/// 订阅状态变更事件
///
/// 事件名为 `workload-update` 或 `deployment-deleted`，数据为 JSON
async fn stream_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (mut rx, subscription) = state.event_bus.subscribe_channel();
    let shutdown = get_shutdown_token();
    tracing::debug!(subscription = subscription.id(), "Event stream opened");

    let stream = async_stream::stream! {
        // 连接断开时 drop，自动注销
        let _subscription = subscription;
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => None,
                event = rx.recv() => event,
            };
            let Some(event) = next else { break };
            let json = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().event(event.kind()).data(json));
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

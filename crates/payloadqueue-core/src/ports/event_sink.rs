//! EventSink port - 自由文の進捗通知
//!
//! エンジンの lifecycle / 進捗イベントは `"[<tag>] <message>"` の形で sink に渡る。
//! 捨てるかログに流すかは呼び出し側が決める。

use std::sync::Arc;

/// EventSink はエンジンの通知を受け取る
pub trait EventSink: Send + Sync {
    fn emit(&self, message: &str);
}

impl<F> EventSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn emit(&self, message: &str) {
        self(message)
    }
}

/// デフォルトの sink: 全イベントを info レベルで `tracing` に流す
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, message: &str) {
        tracing::info!(target: "payloadqueue::events", "{message}");
    }
}

/// 何もしない
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _message: &str) {}
}

/// tag を前置する sink の窓口（エンジンごとに 1 つ）
#[derive(Clone)]
pub(crate) struct Events {
    tag: String,
    sink: Arc<dyn EventSink>,
}

impl Events {
    pub(crate) fn new(tag: impl Into<String>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            tag: tag.into(),
            sink,
        }
    }

    pub(crate) fn tag(&self) -> &str {
        &self.tag
    }

    pub(crate) fn emit(&self, message: impl AsRef<str>) {
        self.sink
            .emit(&format!("[{}] {}", self.tag, message.as_ref()));
    }
}

use thiserror::Error;

use crate::domain::PayloadId;

/// `start()` のエラー。start に失敗したエンジンは使わないこと
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing work handler")]
    MissingWorkHandler,

    #[error("invalid rate: {0} requests/second (must be at least 1)")]
    InvalidRate(u32),

    #[error("queue already started")]
    AlreadyStarted,

    #[error("start() must be called from within a tokio runtime")]
    NoRuntime,
}

/// append できなかった。回復可能（後で再試行するか捨てる）
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AppendError {
    #[error("payload {id} failed: queue is full (capacity {capacity}), try again later")]
    QueueFull { id: PayloadId, capacity: usize },

    #[error("payload {id} failed: queue is closed")]
    Closed { id: PayloadId },
}

/// 設定読み込みのエラー
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("settings io: {0}")]
    Io(#[from] std::io::Error),
}

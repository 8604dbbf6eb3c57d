//! payloadqueue-core
//!
//! tokio アプリ向けの payload バッチング / 流量制御。
//!
//! producer は中身を問わない payload を積み、いつ work に渡すかはキューが決める:
//! - [`BatchQueue`]: backlog が一定数に達するか期限が来たら丸ごと flush
//! - [`RateQueue`]: 一定レートで 1 件ずつ FIFO で流す
//!
//! # モジュール構成
//! - **domain**: payload, ID, tag, lifecycle
//! - **ports**: work, event sink, clock, ID 生成
//! - **batch** / **rate**: 2 つのエンジン
//! - **settings**: serde 設定とデフォルト解決
//! - **observability**: stats スナップショット
//! - **error**: エラー型

pub mod batch;
pub mod domain;
pub mod error;
pub mod observability;
pub mod ports;
pub mod rate;
pub mod sender;
pub mod settings;

mod in_flight;
mod loops;

pub use self::batch::{AGE_POLL_INTERVAL, BatchQueue, BatchQueueBuilder};
pub use self::domain::{Lifecycle, Payload, PayloadId};
pub use self::error::{AppendError, ConfigError, SettingsError};
pub use self::observability::{BatchStats, RateStats};
pub use self::ports::{BatchWork, EventSink, NoopEventSink, RateWork, TracingEventSink};
pub use self::rate::{RateQueue, RateQueueBuilder};
pub use self::sender::PayloadSender;
pub use self::settings::{BatchSettings, RateSettings};

//! Ports - エンジンと呼び出し側の境界
//!
//! - **work**: payload データを処理する関数（`BatchWork`, `RateWork`）
//! - **event_sink**: 進捗通知の送り先
//! - **clock** / **id_generator**: 壁時計と payload ID の発行

pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod work;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{EventSink, NoopEventSink, TracingEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::work::{BatchWork, RateWork};

pub(crate) use self::event_sink::Events;
pub(crate) use self::id_generator::default_id_generator;

//! IdGenerator port - payload ID の生成
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::PayloadId;
use crate::ports::{Clock, SystemClock};

/// IdGenerator は payload ID を発行する
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数の producer から同時に呼ばれる）
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> PayloadId;
}

/// ULID ベースの generator
///
/// タイムスタンプ部は注入した [`Clock`] から取る。
/// `FixedClock` ならタイムスタンプは固定（ランダム部は毎回異なる）。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate(&self) -> PayloadId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        PayloadId::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}

/// builder で指定されなかったときの generator
pub fn default_id_generator() -> Arc<dyn IdGenerator> {
    Arc::new(UlidGenerator::new(SystemClock))
}

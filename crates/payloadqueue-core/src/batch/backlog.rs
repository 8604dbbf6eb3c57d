//! BatchBacklog - バッチ backlog の状態と「サイズ or 経過時間」トリガ
//!
//! # 設計
//! - ここは全部同期処理で、`now` は引数で受け取る
//! - エンジン側が 1 つの Mutex の中で呼び、dispatch はロックの外で行う

use std::mem;
use std::time::Duration;

use tokio::time::Instant;

use crate::domain::{Lifecycle, Payload, PayloadId};
use crate::settings::MAX_BATCH_MAX_AGE_SECS;

/// backlog に適用するコマンド
///
/// `Tick` は何も追加せずトリガだけ再評価する（age watchdog が使う）
#[derive(Debug)]
pub(crate) enum Signal<T> {
    Append(Payload<T>),
    Tick,
}

/// [`Signal`] を適用した結果
#[derive(Debug)]
pub(crate) enum Applied<T> {
    /// close 中なので payload は捨てた
    Rejected(PayloadId),

    /// 何も起きなかった
    Held { queued: Option<PayloadId> },

    /// トリガ発火。期限切れだけで発火した場合 `batch` は空のことがある
    Flushed {
        queued: Option<PayloadId>,
        batch: Vec<Payload<T>>,
    },
}

pub(crate) struct BatchBacklog<T> {
    lifecycle: Lifecycle,
    items: Vec<Payload<T>>,
    max_size: usize,
    max_age: Duration,
    expires_at: Instant,
    batches_flushed: u64,
    payloads_flushed: u64,
}

impl<T> BatchBacklog<T> {
    pub(crate) fn new(max_size: usize, max_age: Duration, now: Instant) -> Self {
        Self {
            lifecycle: Lifecycle::Idle,
            items: Vec::new(),
            max_size,
            max_age,
            expires_at: deadline_after(now, max_age),
            batches_flushed: 0,
            payloads_flushed: 0,
        }
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn batches_flushed(&self) -> u64 {
        self.batches_flushed
    }

    pub(crate) fn payloads_flushed(&self) -> u64 {
        self.payloads_flushed
    }

    /// Idle -> Running。期限はここから数える
    pub(crate) fn start(&mut self, now: Instant) {
        self.lifecycle = Lifecycle::Running;
        self.expires_at = deadline_after(now, self.max_age);
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub(crate) fn apply(&mut self, signal: Signal<T>, now: Instant) -> Applied<T> {
        let queued = match signal {
            Signal::Append(payload) if !self.lifecycle.accepts_appends() => {
                return Applied::Rejected(payload.id());
            }
            Signal::Append(payload) => {
                let id = payload.id();
                self.items.push(payload);
                Some(id)
            }
            Signal::Tick => None,
        };

        // Idle の間は溜めるだけ
        if !self.lifecycle.is_running() {
            return Applied::Held { queued };
        }

        if self.items.len() >= self.max_size || self.is_expired(now) {
            let batch = mem::take(&mut self.items);
            self.expires_at = deadline_after(now, self.max_age);
            if !batch.is_empty() {
                self.batches_flushed += 1;
                self.payloads_flushed += batch.len() as u64;
            }
            return Applied::Flushed { queued, batch };
        }

        Applied::Held { queued }
    }

    /// Running/Idle -> Closing。すでに close 中なら false
    pub(crate) fn begin_close(&mut self) -> bool {
        if self.lifecycle.is_shutting_down() {
            return false;
        }
        self.lifecycle = Lifecycle::Closing;
        true
    }

    /// Closing -> Closed。発火しなかった分を捨て、その件数を返す
    pub(crate) fn finish_close(&mut self) -> usize {
        self.lifecycle = Lifecycle::Closed;
        let abandoned = self.items.len();
        self.items.clear();
        abandoned
    }
}

/// `now + max_age`。Instant の範囲を超える場合は上限の期間で代用する
fn deadline_after(now: Instant, max_age: Duration) -> Instant {
    now.checked_add(max_age)
        .or_else(|| now.checked_add(Duration::from_secs(MAX_BATCH_MAX_AGE_SECS)))
        .unwrap_or(now)
}

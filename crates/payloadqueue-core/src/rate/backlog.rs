//! RateBacklog - rate queue の FIFO backlog
//!
//! # 状態
//! - `lifecycle`: Idle / Running / Closing / Closed
//! - `paused`: `pause()` / `restart()` で切り替える。start 前の pause もそのまま残る
//! - dispatch できるのは Running かつ paused でないときだけ

use std::collections::VecDeque;

use crate::domain::{Lifecycle, Payload};
use crate::error::AppendError;

pub(crate) struct RateBacklog<T> {
    lifecycle: Lifecycle,
    paused: bool,
    items: VecDeque<Payload<T>>,
    max_size: usize,
    dispatched: u64,
    rejected: u64,
}

impl<T> RateBacklog<T> {
    pub(crate) fn new(max_size: usize) -> Self {
        Self {
            lifecycle: Lifecycle::Idle,
            paused: false,
            items: VecDeque::new(),
            max_size,
            dispatched: 0,
            rejected: 0,
        }
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub(crate) fn is_active(&self) -> bool {
        self.lifecycle.is_running() && !self.paused
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn dispatched(&self) -> u64 {
        self.dispatched
    }

    pub(crate) fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Idle -> Running。paused はいじらない
    pub(crate) fn start(&mut self) {
        self.lifecycle = Lifecycle::Running;
    }

    /// 容量チェックは格納前に行う
    pub(crate) fn push(&mut self, payload: Payload<T>) -> Result<(), AppendError> {
        if !self.lifecycle.accepts_appends() {
            return Err(AppendError::Closed { id: payload.id() });
        }
        if self.items.len() >= self.max_size {
            self.rejected += 1;
            return Err(AppendError::QueueFull {
                id: payload.id(),
                capacity: self.max_size,
            });
        }
        self.items.push_back(payload);
        Ok(())
    }

    /// 先頭を取り出す。未起動・pause 中は None
    pub(crate) fn pop_next(&mut self) -> Option<Payload<T>> {
        if !self.is_active() {
            return None;
        }
        self.pop_front()
    }

    /// pause に関係なく先頭を取り出す（close 時の drain 用）
    pub(crate) fn pop_front(&mut self) -> Option<Payload<T>> {
        let payload = self.items.pop_front()?;
        self.dispatched += 1;
        Some(payload)
    }

    pub(crate) fn set_active(&mut self, active: bool) -> bool {
        // close 後は再開させない
        if self.lifecycle.is_shutting_down() {
            return false;
        }
        self.paused = !active;
        true
    }

    /// close 開始前の lifecycle を返す。すでに close 中なら None
    pub(crate) fn begin_close(&mut self) -> Option<Lifecycle> {
        let previous = self.lifecycle;
        if previous.is_shutting_down() {
            return None;
        }
        self.lifecycle = Lifecycle::Closing;
        Some(previous)
    }

    pub(crate) fn discard(&mut self) -> usize {
        let discarded = self.items.len();
        self.items.clear();
        discarded
    }

    pub(crate) fn finish_close(&mut self) {
        self.lifecycle = Lifecycle::Closed;
    }
}

//! InFlight - 実行中の work 呼び出しの wait-group
//!
//! # 使い方
//! - guard は batch を backlog から取り出すのと同じロック区間で取る
//!   （`close()` が「flush を取った直後・spawn 前」の 0 を見ないように）
//! - guard の drop（panic の unwind 中を含む）で枠を返す

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Default)]
pub(crate) struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            in_flight: Arc::clone(self),
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// 生きている guard がなくなったら返る。ポーリングはしない
    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // 先に登録してから数を見る（notify_waiters の取りこぼし防止）
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug)]
pub(crate) struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.in_flight.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn idle_when_nothing_entered() {
        let in_flight = InFlight::new();
        tokio::time::timeout(Duration::from_millis(100), in_flight.wait_idle())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_every_guard() {
        let in_flight = InFlight::new();
        let g1 = in_flight.enter();
        let g2 = in_flight.enter();
        assert_eq!(in_flight.count(), 2);

        let waiter = tokio::spawn({
            let in_flight = Arc::clone(&in_flight);
            async move { in_flight.wait_idle().await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(g1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(g2);
        waiter.await.unwrap();
        assert_eq!(in_flight.count(), 0);
    }

    #[tokio::test]
    async fn guard_released_on_panic() {
        let in_flight = InFlight::new();
        let guard = in_flight.enter();
        let result = tokio::spawn(async move {
            let _guard = guard;
            panic!("work blew up");
        })
        .await;
        assert!(result.is_err());
        assert_eq!(in_flight.count(), 0);
    }
}

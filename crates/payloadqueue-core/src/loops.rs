//! LoopGroup - バックグラウンドループのまとめ役
//! - `request_shutdown()` で全ループに停止を通知
//! - `shutdown_and_join()` で全ループの終了を待つ

use std::future::Future;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// エンジン 1 つ分の常駐 task（タイマー + append listener）
pub(crate) struct LoopGroup {
    handle: Handle,
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<(&'static str, JoinHandle<()>)>,
}

impl LoopGroup {
    pub(crate) fn new(handle: Handle) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            handle,
            shutdown_tx,
            joins: Vec::new(),
        }
    }

    /// 停止要求を受け取る receiver。ループごとに 1 つ渡す
    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub(crate) fn spawn<F>(&mut self, name: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.joins.push((name, self.handle.spawn(fut)));
    }

    /// 全ループに停止を要求する。実行中の work は中断しない
    pub(crate) fn request_shutdown(&self) {
        // receiver はもう居ないかもしれない
        let _ = self.shutdown_tx.send(true);
    }

    pub(crate) async fn shutdown_and_join(self) {
        self.request_shutdown();
        for (name, join) in self.joins {
            if let Err(e) = join.await {
                tracing::warn!(loop_name = name, error = %e, "background loop ended abnormally");
            }
        }
    }
}

/// 停止要求が来たか group が drop されたら返る
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    // sender drop も停止扱い
    let _ = rx.wait_for(|stop| *stop).await;
}

//! PayloadSender - channel 経由の producer ハンドル

use tokio::sync::mpsc;

use crate::domain::Payload;
use crate::error::AppendError;

/// エンジンの append listener に payload を送る
///
/// clone は軽く、どのスレッドからでも使える。
/// キューが close された後の send は [`AppendError::Closed`] になる。
pub struct PayloadSender<T> {
    tx: mpsc::UnboundedSender<Payload<T>>,
}

impl<T> PayloadSender<T> {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Payload<T>>) -> Self {
        Self { tx }
    }

    pub fn send(&self, payload: Payload<T>) -> Result<(), AppendError> {
        self.tx
            .send(payload)
            .map_err(|e| AppendError::Closed { id: e.0.id() })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T> Clone for PayloadSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

//! エンジンの lifecycle 状態機械

use serde::{Deserialize, Serialize};

/// キューエンジンの lifecycle
///
/// # 状態遷移
/// - Idle -> Running（start 成功）
/// - Running -> Closing -> Closed（close）
/// - Idle -> Closing -> Closed（start せずに close）
///
/// `Idle` 中の append は溜めるだけ。`Running` になるまで dispatch しない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifecycle {
    /// 作成済み、未起動
    Idle,

    /// ループが動いていてトリガを評価する
    Running,

    /// `close()` 中。新しい append は受け付けない
    Closing,

    /// close 完了
    Closed,
}

impl Lifecycle {
    /// まだ payload を受け付けるか
    pub fn accepts_appends(self) -> bool {
        matches!(self, Lifecycle::Idle | Lifecycle::Running)
    }

    /// トリガを発火させ work を dispatch してよいか
    pub fn is_running(self) -> bool {
        matches!(self, Lifecycle::Running)
    }

    pub fn is_shutting_down(self) -> bool {
        matches!(self, Lifecycle::Closing | Lifecycle::Closed)
    }
}

//! Payload ID
//!
//! # 方針
//! - ULID を使う（作成時刻順にソートでき、調整なしで複数 producer が同時に発行できる）
//! - ID は空にならない。payload なしでトリガを再評価するのは `Signal::Tick` の役目

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// payload 1 件の識別子
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PayloadId(Ulid);

impl PayloadId {
    pub const PREFIX: &'static str = "payload-";

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for PayloadId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for PayloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_has_prefix() {
        let ulid = Ulid::new();
        let id = PayloadId::from_ulid(ulid);
        assert_eq!(id.to_string(), format!("payload-{ulid}"));
        assert_eq!(id.as_ulid(), ulid);
    }

    #[test]
    fn ids_sort_by_creation_time() {
        let id1 = PayloadId::from(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2)); // 時刻が進むのを待つ
        let id2 = PayloadId::from(Ulid::new());
        assert!(id1 < id2);
    }

    #[test]
    fn size_matches_ulid() {
        assert_eq!(std::mem::size_of::<PayloadId>(), std::mem::size_of::<Ulid>());
    }
}

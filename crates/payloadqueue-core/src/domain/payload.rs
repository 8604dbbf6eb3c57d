//! Payload - 中身を問わない作業単位とその ID

use super::PayloadId;

/// キューに投入する作業単位
///
/// # 不変条件
/// - エンジンは `data` の中を見ない
/// - 作成後は不変。データを取り出すには [`Payload::into_data`] で消費する
///
/// 通常はエンジンの `new_payload` で作る（新しい [`PayloadId`] が付く）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload<T> {
    id: PayloadId,
    data: T,
}

impl<T> Payload<T> {
    pub fn new(id: PayloadId, data: T) -> Self {
        Self { id, data }
    }

    pub fn id(&self) -> PayloadId {
        self.id
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }
}

/// batch を work に渡すデータ列に展開する
pub(crate) fn unpack<T>(batch: Vec<Payload<T>>) -> Vec<T> {
    batch.into_iter().map(Payload::into_data).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn unpack_keeps_append_order() {
        let batch: Vec<Payload<&str>> = ["a", "b", "c"]
            .into_iter()
            .map(|d| Payload::new(PayloadId::from(Ulid::new()), d))
            .collect();
        assert_eq!(unpack(batch), vec!["a", "b", "c"]);
    }
}

//! Work port - payload のデータを処理する呼び出し側の関数
//!
//! 戻り値の `i32` は呼び出し側が決める status code。
//! エンジンは解釈せず、event sink に報告するだけ。
//!
//! どちらの trait も async クロージャに実装済みなので、普通は impl を書かなくてよい:
//!
//! ```ignore
//! let queue = BatchQueue::builder()
//!     .work(|batch: Vec<Job>| async move {
//!         println!("got {} jobs", batch.len());
//!         0
//!     })
//!     .build();
//! ```

use std::future::Future;

use async_trait::async_trait;

/// [`BatchQueue`](crate::BatchQueue) の work: flush された batch を丸ごと受け取る
#[async_trait]
pub trait BatchWork<T>: Send + Sync {
    async fn work(&self, batch: Vec<T>) -> i32;
}

#[async_trait]
impl<T, F, Fut> BatchWork<T> for F
where
    F: Fn(Vec<T>) -> Fut + Send + Sync,
    Fut: Future<Output = i32> + Send,
    T: Send + 'static,
{
    async fn work(&self, batch: Vec<T>) -> i32 {
        self(batch).await
    }
}

/// [`RateQueue`](crate::RateQueue) の work: payload 1 件分のデータを受け取る
#[async_trait]
pub trait RateWork<T>: Send + Sync {
    async fn work(&self, item: T) -> i32;
}

#[async_trait]
impl<T, F, Fut> RateWork<T> for F
where
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = i32> + Send,
    T: Send + 'static,
{
    async fn work(&self, item: T) -> i32 {
        self(item).await
    }
}

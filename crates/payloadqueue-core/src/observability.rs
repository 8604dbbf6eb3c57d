use std::time::Duration;

use serde::{Deserialize, Serialize};

/// [`BatchQueue`](crate::BatchQueue) のある時点の状態
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub tag: String,
    pub backlog: usize,
    pub in_flight: usize,
    pub batches_flushed: u64,
    pub payloads_flushed: u64,
}

/// [`RateQueue`](crate::RateQueue) のある時点の状態
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateStats {
    pub tag: String,
    pub backlog: usize,
    pub active: bool,
    pub dispatched: u64,
    pub rejected: u64,
    /// dispatch 間隔。start までは `None`
    pub interval: Option<Duration>,
}

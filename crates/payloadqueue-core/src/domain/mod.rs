//! ドメインモデル（payload, ID, tag, lifecycle）

pub mod ids;
pub mod lifecycle;
pub mod payload;
pub mod tag;

pub use ids::PayloadId;
pub use lifecycle::Lifecycle;
pub use payload::Payload;
pub use tag::{DEFAULT_TAG_LEN, random_tag};

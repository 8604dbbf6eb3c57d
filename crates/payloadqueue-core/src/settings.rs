//! Settings - キュー設定とデフォルト解決
//!
//! # 方針
//! - 設定はただの serde 構造体（builder / JSON 文字列 / JSON ファイルのどれからでも作れる）
//! - 数値の 0 と空の tag は「未設定」扱い
//! - `resolve()` はデフォルトを埋め、埋めた項目ごとに note を返す
//!   （note は `start()` で event sink に流す）

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::{DEFAULT_TAG_LEN, random_tag};
use crate::error::{ConfigError, SettingsError};

pub const DEFAULT_BATCH_MAX_SIZE: usize = 100;
pub const DEFAULT_BATCH_MAX_AGE_SECS: u64 = 10;
pub const DEFAULT_RATE_MAX_SIZE: usize = 100_000;
pub const MAX_REQUESTS_PER_SECOND: u32 = 1000;
/// max age の上限（10 年）。これを超える値は丸める。
pub const MAX_BATCH_MAX_AGE_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// [`BatchQueue`](crate::BatchQueue) の設定
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub tag: String,
    pub max_size: usize,
    pub max_age_secs: u64,
}

/// [`RateQueue`](crate::RateQueue) の設定
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateSettings {
    pub tag: String,
    pub max_size: usize,
    pub requests_per_second: u32,
    pub discard_on_close: bool,
}

/// デフォルト適用済みの設定と、適用した内容の note
#[derive(Debug, Clone)]
pub struct Resolved<S> {
    pub settings: S,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBatch {
    pub tag: String,
    pub max_size: usize,
    pub max_age: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRate {
    pub tag: String,
    pub max_size: usize,
    /// 設定値そのまま。検証と丸めは [`ResolvedRate::pacing`] で行う
    pub requests_per_second: u32,
    pub discard_on_close: bool,
}

/// rate queue の dispatch 間隔
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub requests_per_second: u32,
    pub interval: Duration,
    /// 設定値が [`MAX_REQUESTS_PER_SECOND`] を超えていた
    pub clamped: bool,
}

fn resolve_tag(tag: &str, notes: &mut Vec<String>) -> String {
    if tag.is_empty() {
        let tag = random_tag(DEFAULT_TAG_LEN);
        notes.push(format!("Tag: random value assigned is: {tag}"));
        tag
    } else {
        tag.to_string()
    }
}

impl BatchSettings {
    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        load_json(path)
    }

    pub fn resolve(&self) -> Resolved<ResolvedBatch> {
        let mut notes = Vec::new();
        let max_size = if self.max_size == 0 {
            notes.push(format!(
                "MaxSize: default value of {DEFAULT_BATCH_MAX_SIZE} was used"
            ));
            DEFAULT_BATCH_MAX_SIZE
        } else {
            self.max_size
        };
        let max_age_secs = match self.max_age_secs {
            0 => {
                notes.push(format!(
                    "MaxAge: default value of {DEFAULT_BATCH_MAX_AGE_SECS} was used"
                ));
                DEFAULT_BATCH_MAX_AGE_SECS
            }
            secs if secs > MAX_BATCH_MAX_AGE_SECS => {
                notes.push(format!(
                    "MaxAge: Max value of {MAX_BATCH_MAX_AGE_SECS} was used"
                ));
                MAX_BATCH_MAX_AGE_SECS
            }
            secs => secs,
        };
        let tag = resolve_tag(&self.tag, &mut notes);
        Resolved {
            settings: ResolvedBatch {
                tag,
                max_size,
                max_age: Duration::from_secs(max_age_secs),
            },
            notes,
        }
    }
}

impl RateSettings {
    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        load_json(path)
    }

    pub fn resolve(&self) -> Resolved<ResolvedRate> {
        let mut notes = Vec::new();
        let max_size = if self.max_size == 0 {
            notes.push(format!(
                "MaxSize: default value of {DEFAULT_RATE_MAX_SIZE} was used"
            ));
            DEFAULT_RATE_MAX_SIZE
        } else {
            self.max_size
        };
        let tag = resolve_tag(&self.tag, &mut notes);
        Resolved {
            settings: ResolvedRate {
                tag,
                max_size,
                requests_per_second: self.requests_per_second,
                discard_on_close: self.discard_on_close,
            },
            notes,
        }
    }
}

impl ResolvedRate {
    /// dispatch 間隔 = 1000ms / rate（整数除算）
    ///
    /// - 1000 を割り切れない rate は近似になる（3/s -> 333ms）
    /// - 除算の前に rate を丸めるので、間隔は 1ms を下回らない
    pub fn pacing(&self) -> Result<Pacing, ConfigError> {
        if self.requests_per_second < 1 {
            return Err(ConfigError::InvalidRate(self.requests_per_second));
        }
        let clamped = self.requests_per_second > MAX_REQUESTS_PER_SECOND;
        let requests_per_second = self.requests_per_second.min(MAX_REQUESTS_PER_SECOND);
        Ok(Pacing {
            requests_per_second,
            interval: Duration::from_millis(u64::from(1000 / requests_per_second)),
            clamped,
        })
    }
}

fn load_json<S: DeserializeOwned>(path: impl AsRef<Path>) -> Result<S, SettingsError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

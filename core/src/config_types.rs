//! Types used to define the fields of [`crate::config::Config`].

// Note this file should generally be restricted to simple struct/enum
// definitions that do not contain business logic.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

/// Which search backend answers index and query calls.
///
/// Only the in-process vector index ships; any other value in a config file
/// is rejected when the file is parsed.
#[derive(Deserialize, Serialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    Manual,
}

/// What to do when a caption arrives for an `image_id` that is already stored.
#[derive(Deserialize, Serialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DedupePolicy {
    /// Append anyway; the id then produces one search hit per copy.
    #[default]
    KeepAll,
    /// Leave the stored record untouched and skip the new one.
    SkipExisting,
    /// Overwrite the stored record in place.
    ReplaceExisting,
}

/// Embedding settings shared by indexing and querying.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct EmbeddingConfig {
    #[serde(default = "EmbeddingConfig::default_provider")]
    pub provider: String,
    #[serde(default = "EmbeddingConfig::default_dim")]
    pub dim: usize,
    /// Model name recorded for the provider; informational for `hashing`.
    #[serde(default = "EmbeddingConfig::default_model")]
    pub model: String,
}

impl EmbeddingConfig {
    fn default_provider() -> String { "hashing".to_string() }
    fn default_dim() -> usize { 384 }
    fn default_model() -> String { "BAAI/bge-large-zh-v1.5".to_string() }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: Self::default_provider(),
            dim: Self::default_dim(),
            model: Self::default_model(),
        }
    }
}

/// Retry and pacing for calls to the external captioner.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct CaptionConfig {
    #[serde(default = "CaptionConfig::default_max_attempts")]
    pub max_attempts: usize,
    /// Sleep before each retry; the last entry repeats.
    #[serde(default = "CaptionConfig::default_backoff_ms")]
    pub backoff_ms: Vec<u64>,
    /// Sleep between consecutive images in a batch.
    #[serde(default = "CaptionConfig::default_pacing_ms")]
    pub pacing_ms: u64,
}

impl CaptionConfig {
    fn default_max_attempts() -> usize { 3 }
    fn default_backoff_ms() -> Vec<u64> { vec![2000] }
    fn default_pacing_ms() -> u64 { 1500 }

    pub fn retry_policy(&self) -> crate::caption::RetryPolicy {
        crate::caption::RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff_ms.iter().map(|ms| Duration::from_millis(*ms)).collect(),
        }
    }

    pub fn settings(&self) -> crate::caption::CaptionSettings {
        crate::caption::CaptionSettings {
            retry: self.retry_policy(),
            pacing: Duration::from_millis(self.pacing_ms),
        }
    }
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            backoff_ms: Self::default_backoff_ms(),
            pacing_ms: Self::default_pacing_ms(),
        }
    }
}

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;

use crate::config_types::BackendKind;
use crate::config_types::CaptionConfig;
use crate::config_types::DedupePolicy;
use crate::config_types::EmbeddingConfig;
use crate::error::CoreError;
use crate::error::Result;

/// Embedding providers that [`crate::embedder::select_embedding_provider`]
/// knows how to build.
pub const KNOWN_EMBEDDING_PROVIDERS: &[&str] = &["hashing"];

/// Application configuration, built once at the entry point and handed to
/// each component.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "Config::default_image_dir")]
    pub image_dir: PathBuf,

    /// Directory holding the persisted vector file.
    #[serde(default = "Config::default_index_dir")]
    pub index_dir: PathBuf,

    #[serde(default = "Config::default_collection_name")]
    pub collection_name: String,

    #[serde(default)]
    pub backend: BackendKind,

    #[serde(default = "Config::default_top_k")]
    pub top_k: usize,

    #[serde(default)]
    pub dedupe: DedupePolicy,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub caption: CaptionConfig,
}

/// Optional values that take precedence over the config file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub image_dir: Option<PathBuf>,
    pub index_dir: Option<PathBuf>,
    pub collection_name: Option<String>,
    pub top_k: Option<usize>,
    pub dedupe: Option<DedupePolicy>,
}

impl Config {
    fn default_image_dir() -> PathBuf { PathBuf::from("data/images") }
    fn default_index_dir() -> PathBuf { PathBuf::from("data/index") }
    fn default_collection_name() -> String { "image_captions".to_string() }
    fn default_top_k() -> usize { 5 }

    /// Parse a TOML document; missing keys take their defaults. Not validated.
    fn parse(s: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Load from `path` (or defaults when `None`), apply `overrides`, and
    /// validate the result.
    pub fn load_with_overrides(path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => {
                let s = std::fs::read_to_string(p).map_err(|e| {
                    CoreError::config(format!("cannot read config file {}: {e}", p.display()))
                })?;
                Self::parse(&s).map_err(|e| {
                    CoreError::config(format!("invalid config file {}: {e}", p.display()))
                })?
            }
            None => Config::default(),
        };
        cfg.apply(overrides);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply(&mut self, overrides: ConfigOverrides) {
        let ConfigOverrides { image_dir, index_dir, collection_name, top_k, dedupe } = overrides;
        if let Some(v) = image_dir { self.image_dir = v; }
        if let Some(v) = index_dir { self.index_dir = v; }
        if let Some(v) = collection_name { self.collection_name = v; }
        if let Some(v) = top_k { self.top_k = v; }
        if let Some(v) = dedupe { self.dedupe = v; }
    }

    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(CoreError::config("top_k must be a positive integer"));
        }
        if self.collection_name.trim().is_empty() {
            return Err(CoreError::config("collection_name must not be empty"));
        }
        if self.embedding.dim == 0 {
            return Err(CoreError::config("embedding.dim must be positive"));
        }
        if self.caption.max_attempts == 0 {
            return Err(CoreError::config("caption.max_attempts must be at least 1"));
        }
        let provider = self.embedding.provider.trim();
        if !KNOWN_EMBEDDING_PROVIDERS.iter().any(|p| p.eq_ignore_ascii_case(provider)) {
            return Err(CoreError::config(format!(
                "unknown embedding provider '{provider}' (supported: {})",
                KNOWN_EMBEDDING_PROVIDERS.join(", ")
            )));
        }
        Ok(())
    }

    /// `<index_dir>/<collection_name>_vectors.json`
    pub fn vector_path(&self) -> PathBuf {
        self.index_dir.join(format!("{}_vectors.json", self.collection_name))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image_dir: Self::default_image_dir(),
            index_dir: Self::default_index_dir(),
            collection_name: Self::default_collection_name(),
            backend: BackendKind::default(),
            top_k: Self::default_top_k(),
            dedupe: DedupePolicy::default(),
            embedding: EmbeddingConfig::default(),
            caption: CaptionConfig::default(),
        }
    }
}

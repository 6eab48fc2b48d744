use tracing::debug;
use vlmrag_index::EmbeddingProvider;
use vlmrag_index::HashingEmbeddingProvider;

use crate::config_types::EmbeddingConfig;
use crate::error::CoreError;
use crate::error::Result;

/// Build the embedding provider named by `cfg.provider`.
pub fn select_embedding_provider(cfg: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    if cfg.dim == 0 {
        return Err(CoreError::config("embedding.dim must be positive"));
    }
    match cfg.provider.trim().to_ascii_lowercase().as_str() {
        "hashing" => {
            debug!(dim = cfg.dim, model = %cfg.model, "using hashing embedder");
            Ok(Box::new(HashingEmbeddingProvider::new(cfg.dim)))
        }
        other => Err(CoreError::config(format!("unknown embedding provider '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_provider_uses_configured_dim() {
        let cfg = EmbeddingConfig { dim: 32, ..Default::default() };
        let p = select_embedding_provider(&cfg).unwrap();
        assert_eq!(p.dim(), 32);
        assert_eq!(p.embed("a photo").unwrap().len(), 32);
    }

    #[test]
    fn unknown_provider_is_config_error() {
        let cfg = EmbeddingConfig { provider: "openai".into(), ..Default::default() };
        assert!(matches!(select_embedding_provider(&cfg), Err(CoreError::Config(_))));
    }
}

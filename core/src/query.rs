use std::time::Instant;

use serde::Serialize;
use tracing::debug;
use vlmrag_index::EmbeddingProvider;
use vlmrag_index::SearchHit;

use crate::backend::SearchBackend;
use crate::error::CoreError;
use crate::error::Result;

/// Public result entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryHit {
    pub image_id: String,
    pub image_path: String,
    pub caption: String,
    pub score: f32,
}

impl From<SearchHit> for QueryHit {
    fn from(hit: SearchHit) -> Self {
        let SearchHit { score, metadata } = hit;
        Self {
            image_id: metadata.image_id,
            image_path: metadata.image_path,
            caption: metadata.caption,
            score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub query: String,
    pub results: Vec<QueryHit>,
    /// Embedding plus search, rounded to the nearest millisecond.
    pub elapsed_ms: u64,
}

/// Answers text queries against a backend. Holds no state between calls.
pub struct QueryPipeline {
    backend: Option<Box<dyn SearchBackend>>,
    embedder: Box<dyn EmbeddingProvider>,
}

impl QueryPipeline {
    /// `backend` may be `None` for an index that was never built.
    pub fn new(backend: Option<Box<dyn SearchBackend>>, embedder: Box<dyn EmbeddingProvider>) -> Self {
        Self { backend, embedder }
    }

    pub fn query(&self, text: &str, top_k: usize) -> Result<QueryResponse> {
        if top_k == 0 {
            return Err(CoreError::InvalidTopK);
        }
        let backend = match self.backend.as_deref() {
            Some(b) if b.count() > 0 => b,
            _ => {
                debug!("query against an empty index");
                return Ok(QueryResponse { query: text.to_string(), results: Vec::new(), elapsed_ms: 0 });
            }
        };

        let start = Instant::now();
        let embedding = self.embedder.embed(text)?;
        let hits = backend.search(&embedding, top_k)?;
        let elapsed_ms = (start.elapsed().as_secs_f64() * 1000.0).round() as u64;

        debug!(hits = hits.len(), elapsed_ms, "query answered");
        Ok(QueryResponse {
            query: text.to_string(),
            results: hits.into_iter().map(QueryHit::from).collect(),
            elapsed_ms,
        })
    }
}

use chrono::Utc;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;
use vlmrag_index::EmbeddingProvider;
use vlmrag_index::RecordMetadata;

use crate::backend::IndexOutcome;
use crate::backend::SearchBackend;
use crate::caption::CaptionRecord;
use crate::error::Result;

/// Totals for one [`IndexingPipeline::index_batch`] run.
///
/// `succeeded` counts every handled item, including `skipped` and
/// `replaced` ones; `failed == total - succeeded`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub replaced: usize,
}

/// Embeds caption records and stores them through a [`SearchBackend`].
pub struct IndexingPipeline<'a> {
    backend: &'a mut dyn SearchBackend,
    embedder: &'a dyn EmbeddingProvider,
}

impl<'a> IndexingPipeline<'a> {
    pub fn new(backend: &'a mut dyn SearchBackend, embedder: &'a dyn EmbeddingProvider) -> Self {
        Self { backend, embedder }
    }

    /// Embed and store one record. Failures are logged and reported as
    /// `false`; nothing is persisted.
    pub fn index_one(&mut self, record: &CaptionRecord) -> bool {
        self.try_index(record).is_some()
    }

    /// Index `records` in order, then persist once.
    pub fn index_batch(&mut self, records: &[CaptionRecord]) -> Result<BatchReport> {
        let mut report = BatchReport { total: records.len(), ..Default::default() };
        for record in records {
            match self.try_index(record) {
                Some(outcome) => {
                    report.succeeded += 1;
                    match outcome {
                        IndexOutcome::Inserted => {}
                        IndexOutcome::Replaced => report.replaced += 1,
                        IndexOutcome::Skipped => report.skipped += 1,
                    }
                }
                None => report.failed += 1,
            }
        }
        self.backend.persist()?;
        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            replaced = report.replaced,
            records = self.backend.count(),
            "indexing batch complete"
        );
        Ok(report)
    }

    fn try_index(&mut self, record: &CaptionRecord) -> Option<IndexOutcome> {
        let embedding = match self.embedder.embed(&record.caption) {
            Ok(v) => v,
            Err(e) => {
                warn!(image_id = %record.image_id, "embedding failed: {e}");
                return None;
            }
        };
        if let Some(dim) = self.backend.dim() {
            if embedding.len() != dim {
                warn!(
                    image_id = %record.image_id,
                    expected = dim,
                    got = embedding.len(),
                    "embedding dimension does not match the store"
                );
                return None;
            }
        }
        if embedding.iter().any(|x| !x.is_finite()) {
            warn!(image_id = %record.image_id, "embedding has a non-finite component");
            return None;
        }
        let dim = embedding.len();
        let metadata = RecordMetadata {
            image_id: record.image_id.clone(),
            image_path: record.image_path.clone(),
            caption: record.caption.clone(),
            indexed_at: Utc::now(),
        };
        match self.backend.index(embedding, metadata) {
            Ok(outcome) => {
                debug!(image_id = %record.image_id, dim, ?outcome, "indexed");
                Some(outcome)
            }
            Err(e) => {
                warn!(image_id = %record.image_id, "index failed: {e}");
                None
            }
        }
    }
}

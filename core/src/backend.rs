//! Search capability behind one fixed interface, selected when the
//! configuration is loaded.

use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use tracing::debug;
use vlmrag_index::RecordMetadata;
use vlmrag_index::SearchHit;
use vlmrag_index::VectorStore;

use crate::config::Config;
use crate::config_types::BackendKind;
use crate::config_types::DedupePolicy;
use crate::error::Result;

/// What [`SearchBackend::index`] did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Inserted,
    Replaced,
    /// `image_id` already present under [`DedupePolicy::SkipExisting`].
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionStats {
    pub count: usize,
    pub dim: Option<usize>,
    pub last_indexed: Option<DateTime<Utc>>,
}

pub trait SearchBackend {
    fn count(&self) -> usize;

    /// Dimension shared by stored embeddings, `None` while empty.
    fn dim(&self) -> Option<usize>;

    fn index(&mut self, embedding: Vec<f32>, metadata: RecordMetadata) -> Result<IndexOutcome>;

    /// At most `top_k` hits, highest score first.
    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>>;

    /// Write the current state to durable storage.
    fn persist(&self) -> Result<()>;

    fn stats(&self) -> CollectionStats;

    /// The first `n` stored records, in insertion order.
    fn sample(&self, n: usize) -> Vec<RecordMetadata>;
}

/// In-process exact search over a [`VectorStore`] persisted at one path.
#[derive(Debug)]
pub struct ManualBackend {
    store: VectorStore,
    path: PathBuf,
    dedupe: DedupePolicy,
}

impl ManualBackend {
    pub fn new(store: VectorStore, path: PathBuf, dedupe: DedupePolicy) -> Self {
        Self { store, path, dedupe }
    }

    /// Load the store at `path`; a missing file starts empty.
    pub fn open(path: &Path, dedupe: DedupePolicy) -> Result<Self> {
        let store = VectorStore::load(path)?;
        debug!(path = %path.display(), records = store.count(), "opened manual backend");
        Ok(Self::new(store, path.to_path_buf(), dedupe))
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }
}

impl SearchBackend for ManualBackend {
    fn count(&self) -> usize {
        self.store.count()
    }

    fn dim(&self) -> Option<usize> {
        self.store.dim()
    }

    fn index(&mut self, embedding: Vec<f32>, metadata: RecordMetadata) -> Result<IndexOutcome> {
        let existing = match self.dedupe {
            DedupePolicy::KeepAll => None,
            DedupePolicy::SkipExisting | DedupePolicy::ReplaceExisting => {
                self.store.position(&metadata.image_id)
            }
        };
        match (self.dedupe, existing) {
            (DedupePolicy::SkipExisting, Some(_)) => Ok(IndexOutcome::Skipped),
            (DedupePolicy::ReplaceExisting, Some(i)) => {
                // `i` came from `position`, so it is in range.
                let replaced = self.store.replace(i, embedding, metadata);
                debug_assert!(replaced);
                Ok(IndexOutcome::Replaced)
            }
            _ => {
                self.store.add(embedding, metadata);
                Ok(IndexOutcome::Inserted)
            }
        }
    }

    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        Ok(self.store.top_k(query, top_k)?)
    }

    fn persist(&self) -> Result<()> {
        self.store.save(&self.path)?;
        Ok(())
    }

    fn stats(&self) -> CollectionStats {
        CollectionStats {
            count: self.store.all().len(),
            dim: self.store.dim(),
            last_indexed: self.store.all().map(|(_, m)| m.indexed_at).max(),
        }
    }

    fn sample(&self, n: usize) -> Vec<RecordMetadata> {
        self.store.all().take(n).map(|(_, m)| m.clone()).collect()
    }
}

/// Open the backend named by `cfg.backend` over `cfg.vector_path()`.
pub fn open_backend(cfg: &Config) -> Result<Box<dyn SearchBackend>> {
    match cfg.backend {
        BackendKind::Manual => Ok(Box::new(ManualBackend::open(&cfg.vector_path(), cfg.dedupe)?)),
    }
}

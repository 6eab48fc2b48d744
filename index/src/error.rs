use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The persisted vector file exists but could not be decoded.
    #[error("malformed vector file {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Cosine similarity is undefined when either vector has zero norm.
    #[error("cosine similarity undefined for zero-norm vector")]
    ZeroNorm,

    /// Record `record` holds a NaN or infinite component.
    #[error("embedding of record {record} has a non-finite component")]
    NonFinite { record: usize },

    #[error("failed to serialize vector store: {0}")]
    Serialize(#[source] serde_json::Error),
}

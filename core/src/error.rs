use std::io;

use thiserror::Error;
use vlmrag_index::EmbeddingError;
use vlmrag_index::IndexError;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid or unsupported configuration; fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("top_k must be a positive integer")]
    InvalidTopK,

    #[error("caption file line {line}: {reason}")]
    CaptionFile { line: usize, reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CoreError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        CoreError::Config(msg.into())
    }
}

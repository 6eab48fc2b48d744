pub mod file;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

pub use file::Records;
pub use file::VectorStore;

/// Everything stored next to an embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordMetadata {
    pub image_id: String,
    pub image_path: String,
    pub caption: String,
    pub indexed_at: DateTime<Utc>,
}

/// One ranked entry from [`VectorStore::similarity`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub score: f32,
    pub metadata: RecordMetadata,
}

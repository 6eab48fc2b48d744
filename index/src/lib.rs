//! Exact cosine-similarity vector index for captioned images.
//!
//! [`VectorStore`] keeps (embedding, metadata) pairs in memory, ranks them
//! against a query vector, and persists the whole set as one JSON file.

pub mod embedding;
pub mod error;
pub mod knn;
pub mod store;

pub use embedding::EmbeddingError;
pub use embedding::EmbeddingProvider;
pub use embedding::HashingEmbeddingProvider;
pub use embedding::cosine_similarity;
pub use error::IndexError;
pub use error::Result;
pub use store::RecordMetadata;
pub use store::SearchHit;
pub use store::VectorStore;

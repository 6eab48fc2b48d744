//! Caption-based image retrieval: configuration, the search backend seam,
//! and the indexing and query pipelines built on `vlmrag-index`.

pub mod backend;
pub mod caption;
pub mod config;
pub mod config_types;
pub mod embedder;
pub mod error;
pub mod eval;
pub mod images;
pub mod indexing;
pub mod query;

pub use backend::CollectionStats;
pub use backend::IndexOutcome;
pub use backend::ManualBackend;
pub use backend::SearchBackend;
pub use backend::open_backend;
pub use caption::CaptionFailure;
pub use caption::CaptionOutcome;
pub use caption::CaptionRecord;
pub use caption::CommandCaptioner;
pub use config::Config;
pub use config::ConfigOverrides;
pub use embedder::select_embedding_provider;
pub use error::CoreError;
pub use error::Result;
pub use eval::EvalReport;
pub use eval::EvalSummary;
pub use indexing::BatchReport;
pub use indexing::IndexingPipeline;
pub use query::QueryHit;
pub use query::QueryPipeline;
pub use query::QueryResponse;

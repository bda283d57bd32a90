//! Semantic fingerprinting for issue threads.
//!
//! Everything embedding-related lives here:
//!
//! - `preprocess`: shared text normalization for cache and query input
//! - `embeddings`: the `Embedder` trait and its fastembed implementation
//! - `ranker`: cosine similarity ranking with threshold filtering

pub mod embeddings;
pub mod preprocess;
pub mod ranker;

pub use embeddings::{Embedder, EmbeddingError, FastembedEmbedder};
pub use ranker::IssueRanker;

/// Default embedding model name (768-dimension vectors)
pub const DEFAULT_MODEL: &str = "bge-base-en-v1.5";

/// Default similarity threshold for related-issue matches
pub const DEFAULT_THRESHOLD: f32 = 0.5;

pub mod ledger;
pub mod openai;
pub mod store;

use async_trait::async_trait;

use crate::error::Result;

pub use ledger::{normalize_id, IndexLedger};
pub use openai::OpenAIEmbedder;
pub use store::{EmbeddingFormat, EmbeddingsStore, ScoredRecord};

/// Embedding provider used by the store
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input, in input order
    async fn embed_documents(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}

pub mod cache;
pub mod chain;
pub mod config;
pub mod db;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod search;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use chain::{build_chain, Chain, ChainConfig, ChainResources, ChainType};
pub use config::Config;
pub use error::{RagchatError, Result};
pub use session::{ChatSession, ConversationTurn};

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::chain::{ChainConfig, ChainType};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub ragchat: RagchatConfig,
    #[serde(default)]
    pub corpora: CorporaConfig,
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub chat: ChatConfig,
}

/// Ragchat-specific configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RagchatConfig {
    /// Corpus root. Corpus glob patterns and ledger ids are relative to it.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Vector index + `indexed/` ledger. Defaults to `<data_dir>/embeddings`.
    #[serde(default)]
    pub embeddings_path: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Glob patterns (relative to `data_dir`) for the three corpora
#[derive(Debug, Clone, Deserialize)]
pub struct CorporaConfig {
    #[serde(default = "default_training_pattern")]
    pub training: String,
    #[serde(default = "default_knowledge_pattern")]
    pub knowledge: String,
    #[serde(default = "default_user_pattern")]
    pub user: String,
}

impl Default for CorporaConfig {
    fn default() -> Self {
        Self {
            training: default_training_pattern(),
            knowledge: default_knowledge_pattern(),
            user: default_user_pattern(),
        }
    }
}

/// Embeddings configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    pub model: String,
    pub api_key_env: String,
    pub batch_size: usize,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

/// Free-text splitting configuration (character units)
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: default_top_k() }
    }
}

/// Initial chat settings and model access
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_streaming")]
    pub streaming: bool,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_chain")]
    pub chain: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_max_agent_iterations")]
    pub max_agent_iterations: usize,
    #[serde(default = "default_supported_models")]
    pub supported_models: Vec<String>,
    #[serde(default = "default_chat_api_key_env")]
    pub api_key_env: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_training_pattern() -> String {
    "training/*.md".to_string()
}

fn default_knowledge_pattern() -> String {
    "knowledge/*.md".to_string()
}

fn default_user_pattern() -> String {
    "user/*.*".to_string()
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_chunk_size() -> usize {
    1024
}

fn default_chunk_overlap() -> usize {
    100
}

fn default_top_k() -> usize {
    4
}

fn default_streaming() -> bool {
    true
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_chain() -> String {
    "history".to_string()
}

fn default_max_agent_iterations() -> usize {
    6
}

fn default_supported_models() -> Vec<String> {
    vec![
        "gpt-3.5-turbo".to_string(),
        "gpt-3.5-turbo-16k".to_string(),
        "gpt-4".to_string(),
        "gpt-4-1106-preview".to_string(),
    ]
}

fn default_chat_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in RAGCHAT_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("RAGCHAT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&config_str)?;
        config.validate()?;

        Ok(config)
    }

    /// Parse configuration without touching the environment
    pub fn from_toml(config_str: &str) -> Result<Self> {
        toml::from_str(config_str).context("Failed to parse config.toml")
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let data_dir = &self.ragchat.data_dir;
        if data_dir.exists() && !data_dir.is_dir() {
            anyhow::bail!(
                "data_dir must be a directory, not a file: {}",
                data_dir.display()
            );
        }

        std::env::var(&self.embeddings.api_key_env).with_context(|| {
            format!(
                "Environment variable {} not set. Set it in your .env file or as an environment variable with your OpenAI API key.",
                self.embeddings.api_key_env
            )
        })?;

        if self.embeddings.batch_size == 0 {
            anyhow::bail!("embeddings.batch_size must be greater than 0");
        }

        if self.retrieval.top_k == 0 {
            anyhow::bail!("retrieval.top_k must be greater than 0");
        }

        if self.chunking.chunk_size == 0 {
            anyhow::bail!("chunking.chunk_size must be greater than 0");
        }

        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            anyhow::bail!("chunking.chunk_overlap must be less than chunk_size");
        }

        if self.chat.max_agent_iterations == 0 {
            anyhow::bail!("chat.max_agent_iterations must be greater than 0");
        }

        // Range checks and chain type parsing live on ChainConfig
        self.chain_config()?;

        Ok(())
    }

    /// Corpus root directory
    pub fn data_dir(&self) -> &Path {
        &self.ragchat.data_dir
    }

    /// Vector index and ledger root
    pub fn embeddings_path(&self) -> PathBuf {
        self.ragchat
            .embeddings_path
            .clone()
            .unwrap_or_else(|| self.ragchat.data_dir.join("embeddings"))
    }

    /// Initial chain configuration taken from the `[chat]` section
    pub fn chain_config(&self) -> Result<ChainConfig> {
        let chain_type: ChainType = self.chat.chain.parse()?;
        let chain = ChainConfig {
            model: self.chat.model.clone(),
            temperature: self.chat.temperature,
            streaming: self.chat.streaming,
            max_tokens: self.chat.max_tokens,
            chain_type,
            debug: self.chat.debug,
        };
        chain.validate()?;
        Ok(chain)
    }
}

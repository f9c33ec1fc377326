use std::sync::{Arc, Mutex, RwLock};

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::chain::{build_chain, Chain, ChainConfig, ChainResources, ChainType};
use crate::error::{RagchatError, Result};
use crate::llm::TokenStream;

/// One completed question/answer exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
}

impl ConversationTurn {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// Per-conversation state: the active chain and the turns so far.
///
/// Reconfiguring swaps in a freshly built chain; answers already streaming
/// keep the chain they started with.
pub struct ChatSession {
    resources: ChainResources,
    supported_models: Vec<String>,
    chain: RwLock<Option<Arc<Chain>>>,
    history: Arc<Mutex<Vec<ConversationTurn>>>,
}

impl ChatSession {
    /// An unconfigured session. `supported_models` empty means any model name is accepted.
    pub fn new(resources: ChainResources, supported_models: Vec<String>) -> Self {
        Self {
            resources,
            supported_models,
            chain: RwLock::new(None),
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Build a chain for `config` and make it the active one
    pub fn configure(&self, config: ChainConfig) -> Result<()> {
        if !self.supported_models.is_empty() && !self.supported_models.contains(&config.model) {
            return Err(RagchatError::InvalidInput(format!(
                "Unsupported model '{}'; expected one of: {}",
                config.model,
                self.supported_models.join(", ")
            )));
        }

        let chain = Arc::new(build_chain(config, &self.resources)?);
        *self.chain.write().unwrap() = Some(chain);
        Ok(())
    }

    /// Settings of the active chain
    pub fn settings(&self) -> Option<ChainConfig> {
        self.chain.read().unwrap().as_ref().map(|c| c.config().clone())
    }

    /// Update one setting by its UI name and rebuild the chain.
    ///
    /// Keys: `Model`, `Streaming`, `Chain`, `UseHistory`, `Temperature`,
    /// `MaxTokens`, `Debug`.
    pub fn apply_setting(&self, key: &str, value: &str) -> Result<ChainConfig> {
        let mut config = self.settings().ok_or(RagchatError::ChainNotConfigured)?;
        let value = value.trim();

        match key.trim() {
            "Model" => config.model = value.to_string(),
            "Streaming" => config.streaming = parse_bool(key, value)?,
            "Chain" => config.chain_type = value.parse()?,
            "UseHistory" => {
                config.chain_type = if parse_bool(key, value)? {
                    ChainType::History
                } else {
                    ChainType::NoHistory
                }
            }
            "Temperature" => {
                config.temperature = value
                    .parse()
                    .map_err(|_| RagchatError::InvalidInput(format!("Temperature must be a number, got '{}'", value)))?
            }
            "MaxTokens" => {
                config.max_tokens = value
                    .parse()
                    .map_err(|_| RagchatError::InvalidInput(format!("MaxTokens must be an integer, got '{}'", value)))?
            }
            "Debug" => config.debug = parse_bool(key, value)?,
            other => return Err(RagchatError::InvalidInput(format!("Unknown setting: {}", other))),
        }

        self.configure(config.clone())?;
        log::info!("Setting {} updated to {}", key, value);
        Ok(config)
    }

    pub fn history(&self) -> Vec<ConversationTurn> {
        self.history.lock().unwrap().clone()
    }

    pub fn clear_history(&self) {
        self.history.lock().unwrap().clear();
    }

    /// Answer `question` with the active chain.
    ///
    /// With a history-keeping chain the turn is recorded once the stream has
    /// been fully produced; a stream dropped early records nothing.
    pub fn ask(&self, question: &str) -> Result<TokenStream> {
        let chain = self
            .chain
            .read()
            .unwrap()
            .clone()
            .ok_or(RagchatError::ChainNotConfigured)?;

        if !chain.chain_type().uses_history() {
            return Ok(chain.invoke(question, &[]));
        }

        let history = Arc::clone(&self.history);
        let snapshot = self.history();
        let mut inner = chain.invoke(question, &snapshot);
        let question = question.to_string();

        Ok(TokenStream::spawn(|tx| async move {
            let mut answer = String::new();
            while let Some(item) = inner.next().await {
                match item {
                    Ok(chunk) => {
                        answer.push_str(&chunk);
                        if tx.send(Ok(chunk)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
            history.lock().unwrap().push(ConversationTurn::new(question, answer));
        }))
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(RagchatError::InvalidInput(format!("{} must be true or false, got '{}'", key, value))),
    }
}

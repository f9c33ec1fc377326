//! Retrieval + generation pipelines.
//!
//! A [`Chain`] is built once per [`ChainConfig`] and exposes one contract
//! regardless of strategy: `invoke(question, history)` returns a
//! [`TokenStream`] of answer chunks.

pub mod agent;
pub mod prompts;
pub mod tools;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{RagchatError, Result};
use crate::llm::{ChatModel, CompletionRequest, TokenStream};
use crate::search::Retriever;
use crate::session::ConversationTurn;

pub use agent::AgentChain;
pub use tools::{KnowledgeSearchTool, Tool, ToolRegistry};

pub const MIN_MAX_TOKENS: u32 = 1024;
pub const MAX_MAX_TOKENS: u32 = 131_072;
pub const MAX_TEMPERATURE: f32 = 2.0;

/// Pipeline strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainType {
    NoHistory,
    History,
    HistoryWithTools,
}

impl ChainType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainType::NoHistory => "no-history",
            ChainType::History => "history",
            ChainType::HistoryWithTools => "history-with-tools",
        }
    }

    /// Whether completed turns are recorded and fed back
    pub fn uses_history(&self) -> bool {
        !matches!(self, ChainType::NoHistory)
    }
}

impl FromStr for ChainType {
    type Err = RagchatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "no-history" => Ok(ChainType::NoHistory),
            "history" => Ok(ChainType::History),
            "history-with-tools" => Ok(ChainType::HistoryWithTools),
            other => Err(RagchatError::UnknownChainType(other.to_string())),
        }
    }
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable settings a chain is built from
#[derive(Debug, Clone, PartialEq)]
pub struct ChainConfig {
    pub model: String,
    pub temperature: f32,
    pub streaming: bool,
    pub max_tokens: u32,
    pub chain_type: ChainType,
    pub debug: bool,
}

impl ChainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(RagchatError::InvalidInput("model must not be empty".into()));
        }
        if !(0.0..=MAX_TEMPERATURE).contains(&self.temperature) {
            return Err(RagchatError::InvalidInput(format!(
                "temperature must be within [0, {}], got {}",
                MAX_TEMPERATURE, self.temperature
            )));
        }
        if !(MIN_MAX_TOKENS..=MAX_MAX_TOKENS).contains(&self.max_tokens) {
            return Err(RagchatError::InvalidInput(format!(
                "max_tokens must be within [{}, {}], got {}",
                MIN_MAX_TOKENS, MAX_MAX_TOKENS, self.max_tokens
            )));
        }
        Ok(())
    }
}

/// Collaborators every chain is built against
#[derive(Clone)]
pub struct ChainResources {
    pub model: Arc<dyn ChatModel>,
    pub retriever: Retriever,
    /// Extra tools for the tool-calling agent. `knowledge_search` is always added.
    pub tools: ToolRegistry,
    pub max_agent_iterations: usize,
}

/// Shared pieces of every strategy
#[derive(Clone)]
pub(crate) struct ChainParts {
    pub(crate) config: ChainConfig,
    pub(crate) model: Arc<dyn ChatModel>,
    pub(crate) retriever: Retriever,
}

impl ChainParts {
    /// Prompts and intermediate steps go to info when debug is on
    pub(crate) fn trace(&self, label: &str, text: &str) {
        if self.config.debug {
            log::info!("[{}] {}", label, text);
        } else {
            log::debug!("[{}] {}", label, text);
        }
    }

    pub(crate) fn request(&self, prompt: String) -> CompletionRequest {
        CompletionRequest::prompt(&self.config.model, prompt, self.config.temperature, self.config.max_tokens)
    }

    /// Retrieve context for `question` and run the answer prompt
    pub(crate) async fn answer(&self, question: &str) -> Result<TokenStream> {
        let context = self.retriever.context_for(question).await?;
        let prompt = prompts::answer_prompt(&context, question);
        self.trace("answer prompt", &prompt);

        let request = self.request(prompt);
        if self.config.streaming {
            self.model.stream(request).await
        } else {
            Ok(TokenStream::once(self.model.complete(request).await?))
        }
    }
}

/// Runs `pipeline` on the stream's producer task, forwarding its output.
/// Errors before the first token surface as the stream's only item.
fn pipeline_stream<F, Fut>(pipeline: F) -> TokenStream
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<TokenStream>> + Send + 'static,
{
    TokenStream::spawn(|tx| async move {
        match pipeline().await {
            Ok(stream) => {
                stream.forward(&tx).await;
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
            }
        }
    })
}

/// Retrieve with the raw question, then answer
pub struct RetrievalChain {
    parts: ChainParts,
}

impl RetrievalChain {
    fn invoke(&self, question: &str) -> TokenStream {
        let parts = self.parts.clone();
        let question = question.to_string();
        pipeline_stream(move || async move { parts.answer(&question).await })
    }
}

/// Condense the follow-up into a standalone question, then retrieve and answer
pub struct ConversationalChain {
    parts: ChainParts,
}

impl ConversationalChain {
    fn invoke(&self, question: &str, history: &[ConversationTurn]) -> TokenStream {
        let parts = self.parts.clone();
        let question = question.to_string();
        let chat_history = prompts::format_chat_history(history);

        pipeline_stream(move || async move {
            let standalone = condense(&parts, &chat_history, &question).await?;
            parts.answer(&standalone).await
        })
    }
}

async fn condense(parts: &ChainParts, chat_history: &str, question: &str) -> Result<String> {
    let prompt = prompts::condense_prompt(chat_history, question);
    parts.trace("condense prompt", &prompt);

    let mut request = parts.request(prompt);
    request.temperature = 0.0;
    let standalone = parts.model.complete(request).await?;
    let standalone = standalone.trim();
    parts.trace("standalone question", standalone);

    if standalone.is_empty() {
        Ok(question.to_string())
    } else {
        Ok(standalone.to_string())
    }
}

/// A configured pipeline
pub enum Chain {
    NoHistory(RetrievalChain),
    History(ConversationalChain),
    HistoryWithTools(AgentChain),
}

impl Chain {
    pub fn chain_type(&self) -> ChainType {
        match self {
            Chain::NoHistory(_) => ChainType::NoHistory,
            Chain::History(_) => ChainType::History,
            Chain::HistoryWithTools(_) => ChainType::HistoryWithTools,
        }
    }

    pub fn config(&self) -> &ChainConfig {
        match self {
            Chain::NoHistory(c) => &c.parts.config,
            Chain::History(c) => &c.parts.config,
            Chain::HistoryWithTools(c) => c.config(),
        }
    }

    /// Answer `question`. `history` is ignored by the no-history strategy.
    pub fn invoke(&self, question: &str, history: &[ConversationTurn]) -> TokenStream {
        match self {
            Chain::NoHistory(chain) => chain.invoke(question),
            Chain::History(chain) => chain.invoke(question, history),
            Chain::HistoryWithTools(chain) => chain.invoke(question, history),
        }
    }
}

/// Validate `config` and construct the matching strategy
pub fn build_chain(config: ChainConfig, resources: &ChainResources) -> Result<Chain> {
    config.validate()?;
    log::info!(
        "Building {} chain: model={}, temperature={}, streaming={}, max_tokens={}, debug={}",
        config.chain_type,
        config.model,
        config.temperature,
        config.streaming,
        config.max_tokens,
        config.debug
    );

    let parts = ChainParts {
        model: Arc::clone(&resources.model),
        retriever: resources.retriever.clone(),
        config,
    };

    Ok(match parts.config.chain_type {
        ChainType::NoHistory => Chain::NoHistory(RetrievalChain { parts }),
        ChainType::History => Chain::History(ConversationalChain { parts }),
        ChainType::HistoryWithTools => {
            let mut tools = resources.tools.clone();
            tools.register(Arc::new(KnowledgeSearchTool::new(resources.retriever.clone())));
            Chain::HistoryWithTools(AgentChain::new(parts, tools, resources.max_agent_iterations))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EmbeddingsStore;
    use crate::ingest::element::Metadata;
    use crate::ingest::segmenter::StructuredRecord;
    use crate::testing::{BagOfWordsEmbedder, ScriptedChatModel};
    use tempfile::TempDir;

    fn config(chain_type: ChainType) -> ChainConfig {
        ChainConfig {
            model: "gpt-4".to_string(),
            temperature: 0.7,
            streaming: true,
            max_tokens: 4096,
            chain_type,
            debug: false,
        }
    }

    async fn resources(temp_dir: &TempDir, model: Arc<ScriptedChatModel>) -> ChainResources {
        let store = Arc::new(
            EmbeddingsStore::open(temp_dir.path(), Arc::new(BagOfWordsEmbedder::default()))
                .await
                .unwrap(),
        );
        let records = vec![StructuredRecord {
            question: Some("What is CEOS?".to_string()),
            answer: "CEOS is an energy operating system.".to_string(),
            metadata: Metadata::new(),
            file: "training/ceos_qa.md".to_string(),
        }];
        store.upsert(&records, Some("training/ceos_qa.md")).await.unwrap();

        ChainResources {
            model,
            retriever: store.retriever(4),
            tools: ToolRegistry::new(),
            max_agent_iterations: 3,
        }
    }

    #[test]
    fn test_chain_type_parsing() {
        assert_eq!("no-history".parse::<ChainType>().unwrap(), ChainType::NoHistory);
        assert_eq!("history".parse::<ChainType>().unwrap(), ChainType::History);
        assert_eq!(
            "history-with-tools".parse::<ChainType>().unwrap(),
            ChainType::HistoryWithTools
        );
        assert!(matches!(
            "memoryless".parse::<ChainType>(),
            Err(RagchatError::UnknownChainType(t)) if t == "memoryless"
        ));
        assert_eq!(ChainType::HistoryWithTools.to_string(), "history-with-tools");
        assert!(!ChainType::NoHistory.uses_history());
        assert!(ChainType::History.uses_history());
    }

    #[test]
    fn test_config_ranges() {
        assert!(config(ChainType::History).validate().is_ok());

        let mut bad = config(ChainType::History);
        bad.temperature = 2.5;
        assert!(bad.validate().is_err());

        let mut bad = config(ChainType::History);
        bad.max_tokens = 512;
        assert!(bad.validate().is_err());

        let mut edge = config(ChainType::History);
        edge.temperature = 2.0;
        edge.max_tokens = 131_072;
        assert!(edge.validate().is_ok());
    }

    #[tokio::test]
    async fn test_no_history_chain_answers_from_context() {
        let temp_dir = TempDir::new().unwrap();
        let model = Arc::new(ScriptedChatModel::new(vec!["It is an energy OS."]));
        let chain = build_chain(config(ChainType::NoHistory), &resources(&temp_dir, model.clone()).await).unwrap();

        let answer = chain.invoke("What is CEOS?", &[]).collect_text().await.unwrap();

        assert_eq!(answer, "It is an energy OS.");
        let prompts = model.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("CEOS is an energy operating system."));
        assert!(prompts[0].contains("Question: What is CEOS?"));
    }

    #[tokio::test]
    async fn test_history_chain_condenses_with_rendered_history() {
        let temp_dir = TempDir::new().unwrap();
        let model = Arc::new(ScriptedChatModel::new(vec!["How are you, CEOS?", "I am fine."]));
        let chain = build_chain(config(ChainType::History), &resources(&temp_dir, model.clone()).await).unwrap();

        let history = vec![ConversationTurn::new("hi", "hello")];
        let answer = chain.invoke("and you?", &history).collect_text().await.unwrap();

        assert_eq!(answer, "I am fine.");
        let prompts = model.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("Human: hi"));
        assert!(prompts[0].contains("Assistant: hello"));
        assert!(prompts[0].contains("Follow Up Input: and you?"));
        assert!(prompts[1].contains("Question: How are you, CEOS?"));
        assert_eq!(model.temperatures()[0], 0.0);
    }

    #[tokio::test]
    async fn test_non_streaming_yields_single_chunk() {
        use futures_util::StreamExt;

        let temp_dir = TempDir::new().unwrap();
        let model = Arc::new(ScriptedChatModel::new(vec!["one two three"]));
        let mut cfg = config(ChainType::NoHistory);
        cfg.streaming = false;
        let chain = build_chain(cfg, &resources(&temp_dir, model).await).unwrap();

        let chunks: Vec<String> = chain
            .invoke("What is CEOS?", &[])
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["one two three".to_string()]);
    }

    #[tokio::test]
    async fn test_model_failure_ends_stream_with_error() {
        let temp_dir = TempDir::new().unwrap();
        let model = Arc::new(ScriptedChatModel::new(Vec::<&str>::new()));
        let chain = build_chain(config(ChainType::NoHistory), &resources(&temp_dir, model).await).unwrap();

        assert!(matches!(
            chain.invoke("What is CEOS?", &[]).collect_text().await,
            Err(RagchatError::Llm(_))
        ));
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let model = Arc::new(ScriptedChatModel::new(Vec::<&str>::new()));
        let mut cfg = config(ChainType::History);
        cfg.temperature = -1.0;

        assert!(build_chain(cfg, &resources(&temp_dir, model).await).is_err());
    }
}

//! In-process fakes for the embedding and chat providers.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::embeddings::Embedder;
use crate::error::{RagchatError, Result};
use crate::llm::{ChatMessage, ChatModel, CompletionRequest, ModelTurn, TokenStream, ToolSpec};

/// Hashed bag-of-words vectors: texts sharing words score as similar
pub struct BagOfWordsEmbedder {
    dimensions: usize,
}

impl Default for BagOfWordsEmbedder {
    fn default() -> Self {
        Self { dimensions: 256 }
    }
}

impl BagOfWordsEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            vector[(hasher.finish() % self.dimensions as u64) as usize] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl Embedder for BagOfWordsEmbedder {
    async fn embed_documents(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed(text))
    }
}

/// Embedder whose provider is always unreachable
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed_documents(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Err(RagchatError::Embedding("provider unreachable".to_string()))
    }

    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
        Err(RagchatError::Embedding("provider unreachable".to_string()))
    }
}

/// Bag-of-words embedder that rejects any batch containing `poison`
pub struct RejectingEmbedder {
    inner: BagOfWordsEmbedder,
    poison: String,
}

impl RejectingEmbedder {
    pub fn new(poison: impl Into<String>) -> Self {
        Self {
            inner: BagOfWordsEmbedder::default(),
            poison: poison.into(),
        }
    }
}

#[async_trait]
impl Embedder for RejectingEmbedder {
    async fn embed_documents(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.contains(&self.poison)) {
            return Err(RagchatError::Embedding("OpenAI API error 400 Bad Request".to_string()));
        }
        self.inner.embed_documents(texts).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.inner.embed_query(text).await
    }
}

/// Chat model replaying canned replies and recording what it was asked
#[derive(Default)]
pub struct ScriptedChatModel {
    replies: Mutex<VecDeque<String>>,
    turns: Mutex<VecDeque<ModelTurn>>,
    prompts: Mutex<Vec<String>>,
    temperatures: Mutex<Vec<f32>>,
    tool_requests: Mutex<Vec<CompletionRequest>>,
    chunk_delay: Option<Duration>,
}

impl ScriptedChatModel {
    /// Replies for `complete`/`stream`, consumed in order
    pub fn new<S: Into<String>>(replies: Vec<S>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Turns for `complete_with_tools`, consumed in order
    pub fn with_turns(turns: Vec<ModelTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            ..Self::default()
        }
    }

    /// Pause between streamed chunks
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Last user message of every `complete`/`stream` request
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn temperatures(&self) -> Vec<f32> {
        self.temperatures.lock().unwrap().clone()
    }

    pub fn tool_requests(&self) -> Vec<CompletionRequest> {
        self.tool_requests.lock().unwrap().clone()
    }

    fn next_reply(&self, request: &CompletionRequest) -> Result<String> {
        let prompt = request
            .messages
            .iter()
            .rev()
            .find_map(|m| match m {
                ChatMessage::User(text) => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_default();
        self.prompts.lock().unwrap().push(prompt);
        self.temperatures.lock().unwrap().push(request.temperature);

        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| RagchatError::Llm("scripted model has no more replies".to_string()))
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        self.next_reply(&request)
    }

    async fn stream(&self, request: CompletionRequest) -> Result<TokenStream> {
        let reply = self.next_reply(&request)?;
        let chunks: Vec<String> = reply.split_inclusive(' ').map(String::from).collect();
        let delay = self.chunk_delay;

        Ok(TokenStream::spawn(|tx| async move {
            for (i, chunk) in chunks.into_iter().enumerate() {
                if let (Some(delay), true) = (delay, i > 0) {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
        }))
    }

    async fn complete_with_tools(&self, request: CompletionRequest, _tools: &[ToolSpec]) -> Result<ModelTurn> {
        self.tool_requests.lock().unwrap().push(request);
        self.turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| RagchatError::Llm("scripted model has no more turns".to_string()))
    }
}

//! Chat model boundary: message types, the [`ChatModel`] trait and the
//! cancellable [`TokenStream`] every chain hands back to its caller.

pub mod openai;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::Result;

pub use openai::OpenAIChatModel;

const STREAM_BUFFER: usize = 32;

/// One message of a chat completion request
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    System(String),
    User(String),
    Assistant(String),
    /// Assistant turn that requested tool invocations instead of answering
    AssistantToolCalls(Vec<ToolCall>),
    ToolResult { call_id: String, content: String },
}

/// Tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Tool description advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

/// Outcome of a tool-enabled completion
#[derive(Debug, Clone, PartialEq)]
pub enum ModelTurn {
    Final(String),
    ToolCalls(Vec<ToolCall>),
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// Single user message request
    pub fn prompt(model: &str, prompt: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![ChatMessage::User(prompt.into())],
            temperature,
            max_tokens,
        }
    }
}

/// External LLM provider
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Whole completion in one response
    async fn complete(&self, request: CompletionRequest) -> Result<String>;

    /// Completion delivered chunk by chunk
    async fn stream(&self, request: CompletionRequest) -> Result<TokenStream>;

    /// Completion that may answer with tool calls instead of text
    async fn complete_with_tools(&self, request: CompletionRequest, tools: &[ToolSpec]) -> Result<ModelTurn>;
}

/// Sender half handed to token producers
pub type TokenSender = mpsc::Sender<Result<String>>;

/// Lazy sequence of answer chunks.
///
/// The producing task is aborted when the stream is dropped, so a caller
/// that stops consuming also stops any outstanding provider request. A
/// provider failure arrives as a final `Err` item.
pub struct TokenStream {
    rx: ReceiverStream<Result<String>>,
    task: Option<JoinHandle<()>>,
}

impl TokenStream {
    /// Run `producer` on its own task, streaming whatever it sends
    pub fn spawn<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(TokenSender) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let task = tokio::spawn(producer(tx));
        Self {
            rx: ReceiverStream::new(rx),
            task: Some(task),
        }
    }

    /// Stream fed by an existing channel with no owned producer task
    pub fn from_receiver(rx: mpsc::Receiver<Result<String>>) -> Self {
        Self {
            rx: ReceiverStream::new(rx),
            task: None,
        }
    }

    /// Stream yielding exactly one chunk
    pub fn once(text: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // Capacity 1 and a fresh channel: cannot fail
        let _ = tx.try_send(Ok(text.into()));
        Self::from_receiver(rx)
    }

    /// Drain the stream into one string, stopping at the first error
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(chunk) = self.next().await {
            text.push_str(&chunk?);
        }
        Ok(text)
    }

    /// Forward every item into `tx`. Returns false once the receiver is gone.
    pub async fn forward(mut self, tx: &TokenSender) -> bool {
        while let Some(item) = self.next().await {
            let failed = item.is_err();
            if tx.send(item).await.is_err() {
                return false;
            }
            if failed {
                return false;
            }
        }
        true
    }
}

impl Stream for TokenStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

impl Drop for TokenStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use std::fmt::Display;
use std::time::Duration;

use super::{
    ChatMessage, ChatModel, CompletionRequest, ModelTurn, TokenSender, TokenStream, ToolCall, ToolSpec,
};
use crate::error::{RagchatError, Result};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI chat-completions client
pub struct OpenAIChatModel {
    client: Client,
    api_key: String,
    url: String,
}

impl OpenAIChatModel {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| RagchatError::Llm(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            url: OPENAI_CHAT_URL.to_string(),
        })
    }

    /// Point the client at an OpenAI-compatible endpoint
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| RagchatError::Llm(format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RagchatError::Llm(format!("OpenAI API error {}: {}", status, text)));
        }
        Ok(response)
    }

    async fn post_json(&self, body: &Value) -> Result<Value> {
        self.post(body)
            .await?
            .json()
            .await
            .map_err(|e| RagchatError::Llm(format!("Failed to parse response: {}", e)))
    }
}

fn request_body(request: &CompletionRequest, stream: bool) -> Value {
    json!({
        "model": request.model,
        "messages": request.messages.iter().map(message_json).collect::<Vec<_>>(),
        "temperature": request.temperature,
        "max_tokens": request.max_tokens,
        "stream": stream,
    })
}

fn message_json(message: &ChatMessage) -> Value {
    match message {
        ChatMessage::System(content) => json!({"role": "system", "content": content}),
        ChatMessage::User(content) => json!({"role": "user", "content": content}),
        ChatMessage::Assistant(content) => json!({"role": "assistant", "content": content}),
        ChatMessage::AssistantToolCalls(calls) => json!({
            "role": "assistant",
            "content": Value::Null,
            "tool_calls": calls.iter().map(|call| json!({
                "id": call.id,
                "type": "function",
                "function": {
                    "name": call.name,
                    "arguments": call.arguments.to_string(),
                },
            })).collect::<Vec<_>>(),
        }),
        ChatMessage::ToolResult { call_id, content } => json!({
            "role": "tool",
            "tool_call_id": call_id,
            "content": content,
        }),
    }
}

fn tool_json(tool: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        },
    })
}

/// Final text or tool calls from a non-streaming response
fn parse_turn(payload: &Value) -> Result<ModelTurn> {
    let message = &payload["choices"][0]["message"];
    if message.is_null() {
        return Err(RagchatError::Llm("Response has no choices".to_string()));
    }

    let calls: Vec<ToolCall> = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let name = call["function"]["name"].as_str()?;
                    let raw = call["function"]["arguments"].as_str().unwrap_or("{}");
                    let arguments = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
                    Some(ToolCall {
                        id: call["id"].as_str().unwrap_or_default().to_string(),
                        name: name.to_string(),
                        arguments,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    if calls.is_empty() {
        Ok(ModelTurn::Final(message["content"].as_str().unwrap_or_default().to_string()))
    } else {
        Ok(ModelTurn::ToolCalls(calls))
    }
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Delta(String),
    Done,
    /// Provider error reported inside the event stream
    Error(String),
    Skip,
}

fn parse_sse_line(line: &str) -> SseEvent {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return SseEvent::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseEvent::Done;
    }
    match serde_json::from_str::<Value>(data) {
        Ok(json) if !json["error"].is_null() => {
            let error = &json["error"];
            SseEvent::Error(error["message"].as_str().map(str::to_string).unwrap_or_else(|| error.to_string()))
        }
        Ok(json) => match json["choices"][0]["delta"]["content"].as_str() {
            Some(content) if !content.is_empty() => SseEvent::Delta(content.to_string()),
            _ => SseEvent::Skip,
        },
        Err(_) => SseEvent::Skip,
    }
}

/// Forward the deltas of an SSE body to `tx`.
///
/// Lines are split on raw bytes so a character straddling two network
/// chunks is decoded whole. A body that ends without `[DONE]`, or reports an
/// error event, ends the stream with an `Err` item.
async fn forward_sse<S, B, E>(bytes: S, tx: TokenSender)
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut bytes = std::pin::pin!(bytes);
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(item) = bytes.next().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx.send(Err(RagchatError::Llm(format!("Stream interrupted: {}", e)))).await;
                return;
            }
        };
        buffer.extend_from_slice(chunk.as_ref());

        while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = buffer.drain(..=newline).collect();
            let line = match std::str::from_utf8(&raw) {
                Ok(line) => line,
                Err(e) => {
                    let _ = tx.send(Err(RagchatError::Llm(format!("Invalid UTF-8 in stream: {}", e)))).await;
                    return;
                }
            };
            match parse_sse_line(line) {
                SseEvent::Delta(content) => {
                    if tx.send(Ok(content)).await.is_err() {
                        return;
                    }
                }
                SseEvent::Done => return,
                SseEvent::Error(message) => {
                    let _ = tx.send(Err(RagchatError::Llm(format!("Provider error: {}", message)))).await;
                    return;
                }
                SseEvent::Skip => {}
            }
        }
    }

    let _ = tx
        .send(Err(RagchatError::Llm("stream ended before [DONE]".to_string())))
        .await;
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let payload = self.post_json(&request_body(&request, false)).await?;
        match parse_turn(&payload)? {
            ModelTurn::Final(text) => Ok(text),
            ModelTurn::ToolCalls(_) => Err(RagchatError::Llm(
                "Model requested tools on a plain completion".to_string(),
            )),
        }
    }

    async fn stream(&self, request: CompletionRequest) -> Result<TokenStream> {
        let response = self.post(&request_body(&request, true)).await?;
        let bytes = response.bytes_stream();

        Ok(TokenStream::spawn(|tx| forward_sse(bytes, tx)))
    }

    async fn complete_with_tools(&self, request: CompletionRequest, tools: &[ToolSpec]) -> Result<ModelTurn> {
        let mut body = request_body(&request, false);
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(tool_json).collect());
        }
        parse_turn(&self.post_json(&body).await?)
    }
}

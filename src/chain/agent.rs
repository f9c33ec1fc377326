use std::sync::Arc;

use super::prompts::AGENT_SYSTEM_PROMPT;
use super::tools::ToolRegistry;
use super::{pipeline_stream, ChainConfig, ChainParts};
use crate::error::Result;
use crate::llm::{ChatMessage, CompletionRequest, ModelTurn, TokenStream};
use crate::session::ConversationTurn;

/// Tool-calling agent.
///
/// Each step sends `{system, chat_history, input, scratchpad}` to the model.
/// Tool calls are executed and appended to the scratchpad; a plain answer
/// ends the turn. After `max_iterations` steps without an answer the agent
/// gives up with a fixed reply.
pub struct AgentChain {
    parts: ChainParts,
    tools: Arc<ToolRegistry>,
    max_iterations: usize,
}

impl AgentChain {
    pub(crate) fn new(parts: ChainParts, tools: ToolRegistry, max_iterations: usize) -> Self {
        Self {
            parts,
            tools: Arc::new(tools),
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.parts.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub(crate) fn invoke(&self, question: &str, history: &[ConversationTurn]) -> TokenStream {
        let parts = self.parts.clone();
        let tools = Arc::clone(&self.tools);
        let max_iterations = self.max_iterations;
        let messages = initial_messages(question, history);

        pipeline_stream(move || async move {
            let answer = run_loop(&parts, &tools, messages, max_iterations).await?;
            Ok(TokenStream::once(answer))
        })
    }
}

pub fn give_up_answer(max_iterations: usize) -> String {
    format!("I could not reach an answer within {} steps.", max_iterations)
}

fn initial_messages(question: &str, history: &[ConversationTurn]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    messages.push(ChatMessage::System(AGENT_SYSTEM_PROMPT.to_string()));
    for turn in history {
        messages.push(ChatMessage::User(turn.question.clone()));
        messages.push(ChatMessage::Assistant(turn.answer.clone()));
    }
    messages.push(ChatMessage::User(question.to_string()));
    messages
}

async fn run_loop(
    parts: &ChainParts,
    tools: &ToolRegistry,
    mut messages: Vec<ChatMessage>,
    max_iterations: usize,
) -> Result<String> {
    let specs = tools.specs();

    for step in 1..=max_iterations {
        let request = CompletionRequest {
            model: parts.config.model.clone(),
            messages: messages.clone(),
            temperature: parts.config.temperature,
            max_tokens: parts.config.max_tokens,
        };

        let calls = match parts.model.complete_with_tools(request, &specs).await? {
            ModelTurn::Final(answer) => {
                parts.trace("agent", &format!("step {}: final answer", step));
                return Ok(answer);
            }
            ModelTurn::ToolCalls(calls) => calls,
        };

        messages.push(ChatMessage::AssistantToolCalls(calls.clone()));
        for call in calls {
            parts.trace("agent", &format!("step {}: {}({})", step, call.name, call.arguments));
            // Tool failures go back to the model as observations
            let content = match tools.call(&call.name, call.arguments).await {
                Ok(output) => output,
                Err(e) => format!("Error: {}", e),
            };
            parts.trace("agent", &format!("step {}: {} -> {}", step, call.name, content));
            messages.push(ChatMessage::ToolResult {
                call_id: call.id,
                content,
            });
        }
    }

    log::warn!("Agent stopped after {} steps without a final answer", max_iterations);
    Ok(give_up_answer(max_iterations))
}

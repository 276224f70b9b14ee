use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{AgentError, AgentResult};
use crate::models::message::{Message, ToolRequest};
use crate::prompt_template::load_prompt_file;
use crate::providers::base::Provider;
use crate::registry::ToolRegistry;

/// Model steps allowed in one reply before giving up
pub const DEFAULT_MAX_TURNS: usize = 25;

/// Anything that can continue a conversation given the transcript and a tool set.
///
/// Returns only the messages produced during this call, in order.
#[async_trait]
pub trait ConversationalAgent: Send + Sync {
    async fn invoke(&self, context: &[Message], tools: &ToolRegistry)
        -> AgentResult<Vec<Message>>;
}

#[derive(Clone, Debug, Serialize)]
struct SystemInfo {
    name: String,
    description: String,
    instructions: String,
}

impl SystemInfo {
    fn new(name: &str, description: &str, instructions: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            instructions: instructions.to_string(),
        }
    }
}

/// Agent integrates a foundational LLM with the tools it can call
pub struct Agent {
    provider: Arc<dyn Provider>,
    max_turns: usize,
}

impl Agent {
    /// Create a new Agent with the specified provider
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    fn get_system_prompt(&self, tools: &ToolRegistry) -> AgentResult<String> {
        let mut context = HashMap::new();
        let systems_info: Vec<SystemInfo> = tools
            .systems()
            .iter()
            .map(|system| {
                SystemInfo::new(system.name(), system.description(), system.instructions())
            })
            .collect();

        context.insert("systems", systems_info);
        load_prompt_file("system.md", &context).map_err(|e| AgentError::Internal(e.to_string()))
    }

    /// Create a stream that yields each message as it's generated by the agent.
    /// This includes both the assistant's responses and any tool responses.
    pub async fn reply<'a>(
        &'a self,
        messages: &[Message],
        tools: &'a ToolRegistry,
    ) -> AgentResult<BoxStream<'a, AgentResult<Message>>> {
        let mut messages = messages.to_vec();
        let tool_list = tools.tools();
        let system_prompt = self.get_system_prompt(tools)?;
        let max_turns = self.max_turns;

        Ok(Box::pin(async_stream::try_stream! {
            let mut turns = 0;
            loop {
                if turns >= max_turns {
                    Err::<(), _>(AgentError::RecursionLimit(max_turns))?;
                }
                turns += 1;

                // Get completion from provider
                let (response, _) = self.provider
                    .complete(&system_prompt, &messages, &tool_list)
                    .await
                    .map_err(provider_error)?;

                yield response.clone();

                // Make sure the message above is delivered before potentially
                // long-running tools start
                tokio::task::yield_now().await;

                let tool_requests: Vec<&ToolRequest> = response.content
                    .iter()
                    .filter_map(|content| content.as_tool_request())
                    .collect();

                if tool_requests.is_empty() {
                    break;
                }

                // Dispatch all requests concurrently and wait for every result
                let futures: Vec<_> = tool_requests
                    .iter()
                    .map(|request| tools.dispatch(request.tool_call.clone()))
                    .collect();
                let outputs = futures::future::join_all(futures).await;

                let mut message_tool_response = Message::user();
                for (request, output) in tool_requests.iter().zip(outputs.into_iter()) {
                    if let Err(e) = &output {
                        tracing::warn!("Tool call {} failed: {}", request.id, e);
                    }
                    message_tool_response = message_tool_response.with_tool_response(
                        request.id.clone(),
                        output,
                    );
                }

                yield message_tool_response.clone();

                messages.push(response);
                messages.push(message_tool_response);
            }
        }))
    }
}

#[async_trait]
impl ConversationalAgent for Agent {
    async fn invoke(
        &self,
        context: &[Message],
        tools: &ToolRegistry,
    ) -> AgentResult<Vec<Message>> {
        self.reply(context, tools).await?.try_collect().await
    }
}

fn provider_error(error: anyhow::Error) -> AgentError {
    match error.downcast_ref::<AgentError>() {
        Some(agent_error) => agent_error.clone(),
        None => AgentError::Internal(format!("{:#}", error)),
    }
}

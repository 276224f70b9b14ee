use async_trait::async_trait;
use indoc::indoc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use super::System;
use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};
use crate::prompt_template::load_prompt_file;
use crate::providers::base::Provider;
use crate::rag::Retriever;

pub const DOCUMENTATION_QA_TOOL: &str = "DocumentationQA";

/// Answers questions about the project documentation from the retrieval index
pub struct DocumentationSystem {
    tools: Vec<Tool>,
    retriever: Arc<Retriever>,
    provider: Arc<dyn Provider>,
}

impl DocumentationSystem {
    pub fn new(retriever: Arc<Retriever>, provider: Arc<dyn Provider>) -> Self {
        let qa_tool = Tool::new(
            DOCUMENTATION_QA_TOOL,
            "Use this when you need to answer questions about the project documentation, \
            SUI, Tokenomics or related technical details. The input should be a complete question.",
            json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The complete question to answer from the documentation."
                    }
                }
            }),
        );

        Self {
            tools: vec![qa_tool],
            retriever,
            provider,
        }
    }

    /// Retrieve the most relevant chunks and have the model answer from them
    async fn answer(&self, query: &str) -> AgentResult<String> {
        let chunks = self
            .retriever
            .retrieve(query)
            .await
            .map_err(|e| AgentError::ExecutionError(e.to_string()))?;
        tracing::debug!("[RAG] retrieved {} chunks for query", chunks.len());

        let context_text = chunks
            .iter()
            .map(|chunk| chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let mut context = HashMap::new();
        context.insert("context", context_text.as_str());
        context.insert("question", query);
        let prompt = load_prompt_file("documentation_qa.md", &context)
            .map_err(|e| AgentError::Internal(e.to_string()))?;

        let (response, _usage) = self
            .provider
            .complete("", &[Message::user().with_text(prompt)], &[])
            .await
            .map_err(|e| AgentError::ExecutionError(format!("{:#}", e)))?;
        Ok(response.render_text())
    }
}

#[async_trait]
impl System for DocumentationSystem {
    fn name(&self) -> &str {
        "documentation"
    }

    fn description(&self) -> &str {
        "Question answering over the indexed project documentation."
    }

    fn instructions(&self) -> &str {
        indoc! {r#"
            Ask DocumentationQA a complete, self-contained question whenever the user
            asks about the project, SUI, tokenomics or other technical details that may
            be covered by the documentation. Prefer its answer over your own memory.
        "#}
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        match tool_call.name.as_str() {
            DOCUMENTATION_QA_TOOL => {
                let query = tool_call
                    .arguments
                    .get("query")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        AgentError::InvalidParameters("The query string is required".to_string())
                    })?;
                Ok(vec![Content::text(self.answer(query).await?)])
            }
            _ => Err(AgentError::ToolNotFound(tool_call.name)),
        }
    }
}

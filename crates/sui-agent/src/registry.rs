use std::sync::Arc;

use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};
use crate::providers::utils::sanitize_function_name;
use crate::systems::System;

const PREFIX_SEPARATOR: &str = "__";

/// The full tool set given to the agent: every system's tools, prefixed with
/// the system name so calls can be routed back.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    systems: Vec<Arc<dyn System>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_system(&mut self, system: Arc<dyn System>) {
        self.systems.push(system);
    }

    pub fn with_system(mut self, system: Arc<dyn System>) -> Self {
        self.add_system(system);
        self
    }

    pub fn systems(&self) -> &[Arc<dyn System>] {
        &self.systems
    }

    pub fn is_empty(&self) -> bool {
        self.systems.iter().all(|system| system.tools().is_empty())
    }

    /// Get all tools from all systems with proper system prefixing.
    ///
    /// Both parts of the name are reduced to the characters function names
    /// allow; `dispatch` maps them back to the system's own names.
    pub fn tools(&self) -> Vec<Tool> {
        let mut tools = Vec::new();
        for system in &self.systems {
            for tool in system.tools() {
                tools.push(Tool::new(
                    format!(
                        "{}{}{}",
                        sanitize_function_name(system.name()),
                        PREFIX_SEPARATOR,
                        sanitize_function_name(&tool.name)
                    ),
                    &tool.description,
                    tool.input_schema.clone(),
                ));
            }
        }
        tools
    }

    /// Find the appropriate system for a tool call based on the prefixed name
    fn system_for_tool(&self, prefixed_name: &str) -> AgentResult<(&dyn System, String)> {
        let (system_name, tool_name) = prefixed_name
            .split_once(PREFIX_SEPARATOR)
            .filter(|(system, tool)| !system.is_empty() && !tool.is_empty())
            .ok_or_else(|| AgentError::InvalidToolName(prefixed_name.to_string()))?;

        let system = self
            .systems
            .iter()
            .find(|system| sanitize_function_name(system.name()) == system_name)
            .ok_or_else(|| AgentError::ToolNotFound(prefixed_name.to_string()))?;

        // Names the system doesn't list are passed through for it to reject
        let tool_name = system
            .tools()
            .iter()
            .find(|tool| sanitize_function_name(&tool.name) == tool_name)
            .map(|tool| tool.name.clone())
            .unwrap_or_else(|| tool_name.to_string());
        Ok((system.as_ref(), tool_name))
    }

    /// Dispatch a single tool call to the appropriate system
    pub async fn dispatch(&self, tool_call: AgentResult<ToolCall>) -> AgentResult<Vec<Content>> {
        let call = tool_call?;
        let (system, tool_name) = self.system_for_tool(&call.name)?;
        tracing::info!("Dispatching tool call {}", call.name);
        system.call(ToolCall::new(tool_name, call.arguments)).await
    }
}

//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools are the loop's only side-effecting collaborators. The contract is
//! strict: a tool validates its own input and reports problems *as data*
//! (`ToolOutput` with `is_error = true` and an `"error"` key in the
//! payload), never as a Rust error. The loop feeds error payloads back to
//! the model so it can self-correct. A tool that panics is a framework
//! defect and unwinds through the loop uncaught.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::error::ToolError;
use crate::gateway::ToolDefinition;

/// The structured outcome of one tool execution.
///
/// `is_error` is always set explicitly. The payload is plain JSON — a
/// string for simple tools, an object for structured ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub payload: serde_json::Value,
    pub is_error: bool,
}

impl ToolOutput {
    /// A successful structured result.
    pub fn ok(payload: serde_json::Value) -> Self {
        Self {
            payload,
            is_error: false,
        }
    }

    /// A successful plain-text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            payload: serde_json::Value::String(text.into()),
            is_error: false,
        }
    }

    /// A validation or execution failure, reported as data. The payload
    /// always carries an `"error"` key so the model sees what went wrong.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            payload: serde_json::json!({ "error": message.into() }),
            is_error: true,
        }
    }
}

/// The core Tool trait.
///
/// Each capability (calculator, web_search, clock, ...) implements this.
/// Tools are registered in the [`ToolRegistry`] and offered to the model
/// every iteration.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "calculator").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool. Invalid input comes back as
    /// `ToolOutput::invalid(...)`, never as a panic or error.
    async fn execute(&self, input: serde_json::Value) -> ToolOutput;

    /// Convert this tool into a definition for the gateway request.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// A registry of available tools — the loop's sole dynamic-dispatch point.
///
/// The loop uses this to:
/// 1. Get tool definitions to send with every gateway request
/// 2. Look up and execute tools when the model requests them
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Re-registration under the same name silently
    /// replaces the previous tool (last write wins).
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Get all tool definitions (for sending to the LLM).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Execute a tool by name.
    ///
    /// An unknown name is a configuration defect and returns
    /// [`ToolError::NotFound`]; it is never retried. Tool-internal
    /// failures never surface here — they ride in the returned
    /// `ToolOutput`.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        debug!(tool = %name, "Dispatching tool");
        Ok(tool.execute(input).await)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

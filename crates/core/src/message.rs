//! Turn and content-block domain types.
//!
//! A conversation transcript is an ordered list of [`Turn`]s, each holding
//! ordered [`ContentBlock`]s. Blocks are a tagged union — text, tool_use,
//! tool_result — deserialized explicitly from the provider wire format
//! rather than probed at runtime.

use serde::{Deserialize, Serialize};

/// The role of a turn in a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user. Tool results also travel under this role, as
    /// tool_result blocks, matching the provider wire convention.
    User,
    /// The model.
    Assistant,
}

/// One content block within a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text produced by the user or the model.
    Text { text: String },

    /// The model's request to invoke a named tool with the given input.
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// The recorded outcome of a tool invocation, referencing the
    /// originating tool_use id. `is_error` is always set, never implied.
    ToolResult {
        tool_use_id: String,
        content: serde_json::Value,
        is_error: bool,
    },
}

impl ContentBlock {
    /// Shorthand for a text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn is_tool_use(&self) -> bool {
        matches!(self, Self::ToolUse { .. })
    }
}

/// A single turn in a transcript: a role plus ordered content blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Turn {
    /// Create a user turn holding a single text block.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    /// Create an assistant turn from already-assembled content blocks.
    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Create the user turn that carries a batch of tool results back to
    /// the model. One turn per batch, results in dispatch order.
    pub fn tool_results(results: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: results,
        }
    }

    /// Concatenate the text blocks of this turn, in order.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.content {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    /// Iterate over the tool_use blocks of this turn, in order.
    pub fn tool_uses(&self) -> impl Iterator<Item = &ContentBlock> {
        self.content.iter().filter(|b| b.is_tool_use())
    }
}

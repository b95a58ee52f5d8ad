//! Run metadata — the replayable trace of one loop execution.
//!
//! Every tool invocation and its result are recorded as ordered
//! [`ToolInteraction`] entries. A normally-terminated run records them in
//! even pairs (one tool_use + one tool_result per executed call); only a
//! max-iterations cutoff may leave tool_use entries without their paired
//! result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::gateway::StopReason;

/// One entry in the tool-interaction trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolInteraction {
    /// The model requested a tool invocation.
    ToolUse {
        tool_id: String,
        tool_name: String,
        input: serde_json::Value,
        iteration: u32,
    },

    /// The recorded outcome of that invocation.
    ToolResult {
        tool_id: String,
        tool_name: String,
        output: serde_json::Value,
        is_error: bool,
        iteration: u32,
    },
}

/// The accumulated record of one completed loop execution.
///
/// Created fresh per request, owned by the loop controller for the
/// lifetime of one user turn, then handed to the caller for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Unique id for this run.
    pub run_id: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// Monotonic; one increment per full round-trip (LLM call + tool batch).
    pub iteration_count: u32,

    /// Why the run terminated.
    pub stop_reason: StopReason,

    /// Ordered tool_use / tool_result trace.
    pub tool_interactions: Vec<ToolInteraction>,

    /// Optional caller-facing warning (e.g., the step limit was hit).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl RunMetadata {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            iteration_count: 0,
            stop_reason: StopReason::EndTurn,
            tool_interactions: Vec::new(),
            warning: None,
        }
    }

    /// Number of tool calls that ran to completion (result recorded).
    pub fn executed_calls(&self) -> usize {
        self.tool_interactions
            .iter()
            .filter(|i| matches!(i, ToolInteraction::ToolResult { .. }))
            .count()
    }

    /// Whether every recorded tool_use has its paired tool_result. False
    /// only after a max-iterations cutoff that struck mid-batch.
    pub fn is_paired(&self) -> bool {
        let uses = self
            .tool_interactions
            .iter()
            .filter(|i| matches!(i, ToolInteraction::ToolUse { .. }))
            .count();
        uses == self.executed_calls()
    }
}

impl Default for RunMetadata {
    fn default() -> Self {
        Self::new()
    }
}

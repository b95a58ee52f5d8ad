//! Caller-facing streaming events and their SSE framing.
//!
//! The loop pushes typed [`StreamEvent`]s onto a channel; a separate
//! consumer drains the channel and frames each event for transport. The
//! two halves are deliberately decoupled so orchestration logic and wire
//! framing can be tested independently.

use serde::{Deserialize, Serialize};

use windlass_core::run::RunMetadata;

/// The end-of-stream marker sent after the final event.
pub const END_OF_STREAM: &str = "[DONE]";

/// Events emitted by the loop during a streaming run.
///
/// Ordering guarantees:
/// - text fragments for one content block arrive in provider-emission order
/// - `tool_use_start` always precedes its corresponding `tool_result`
/// - `complete` is last and carries the full cumulative run metadata,
///   including when termination was forced by the iteration cap
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A fragment of assistant text.
    Text { content: String },

    /// A tool invocation is about to be dispatched. Fires only once the
    /// input JSON is fully assembled.
    ToolUseStart {
        tool_name: String,
        tool_id: String,
        input: serde_json::Value,
    },

    /// A tool invocation finished.
    ToolResult {
        tool_name: String,
        result: serde_json::Value,
        is_error: bool,
    },

    /// The run is over — final metadata for persistence.
    Complete { metadata: RunMetadata },
}

impl StreamEvent {
    /// The wire tag of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::ToolUseStart { .. } => "tool_use_start",
            Self::ToolResult { .. } => "tool_result",
            Self::Complete { .. } => "complete",
        }
    }
}

/// Frame one event as an SSE `data:` line.
pub fn sse_frame(event: &StreamEvent) -> String {
    // StreamEvent serialization cannot fail: every payload is already Value
    // or plain data.
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".into());
    format!("data: {json}\n\n")
}

/// The explicit end-of-stream frame, sent after `complete`.
pub fn sse_end_frame() -> String {
    format!("data: {END_OF_STREAM}\n\n")
}

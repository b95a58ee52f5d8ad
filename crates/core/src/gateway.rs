//! LlmGateway trait — the abstraction over the text-generation provider.
//!
//! A gateway knows how to send a transcript (plus system prompt and tool
//! definitions) to an LLM and get content blocks back, either as one
//! complete response or as a stream of low-level events. The loop depends
//! only on the content-block taxonomy and the closed [`StopReason`]
//! enumeration — the wire protocol is the gateway's business.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::message::{ContentBlock, Turn};

/// A tool definition sent to the LLM so it knows what it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The unique tool name.
    pub name: String,

    /// Human description of what the tool does.
    pub description: String,

    /// JSON Schema describing the tool's input.
    pub input_schema: serde_json::Value,
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Why a generation turn (or a whole run) ended.
///
/// This is a closed set. The four provider-originated values are parsed
/// with [`StopReason::from_provider`]; anything else from the wire is a
/// fatal [`GatewayError::IllegalStopReason`]. `MaxIterations` is assigned
/// only by the loop controller, never by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    MaxIterations,
}

impl StopReason {
    /// Parse a provider-sent stop_reason string. Only the four provider
    /// values are legal; `max_iterations` is loop-internal and rejected
    /// here along with everything unknown.
    pub fn from_provider(value: &str) -> Result<Self, GatewayError> {
        match value {
            "end_turn" => Ok(Self::EndTurn),
            "tool_use" => Ok(Self::ToolUse),
            "max_tokens" => Ok(Self::MaxTokens),
            "stop_sequence" => Ok(Self::StopSequence),
            other => Err(GatewayError::IllegalStopReason(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EndTurn => "end_turn",
            Self::ToolUse => "tool_use",
            Self::MaxTokens => "max_tokens",
            Self::StopSequence => "stop_sequence",
            Self::MaxIterations => "max_iterations",
        }
    }
}

/// One request to the gateway: system prompt, message history, and tool
/// definitions. Built fresh by the loop every iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRequest {
    /// The model to use (e.g., "claude-sonnet-4-20250514").
    pub model: String,

    /// System prompt, passed as a top-level field (not a turn).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// The accumulated transcript.
    pub turns: Vec<Turn>,

    /// Tools the model may call this turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Temperature (0.0 = deterministic, 1.0 = creative).
    pub temperature: f32,

    /// Maximum tokens to generate per response.
    pub max_tokens: u32,
}

/// A complete (non-streaming) response from the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayResponse {
    /// Ordered content blocks (text and tool_use).
    pub content: Vec<ContentBlock>,

    /// Why the turn ended. Already validated against the closed set.
    pub stop_reason: StopReason,

    /// Which model actually responded.
    pub model: String,

    /// Token usage, when the provider reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Block-kind information carried by a block-start event.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockStart {
    Text,
    ToolUse { id: String, name: String },
}

/// The incremental payload of a block-delta event.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockDelta {
    /// A fragment of a text block.
    Text(String),
    /// A fragment of a tool_use block's input JSON. Not actionable until
    /// the block stops and the full document parses.
    InputJson(String),
}

/// Low-level streaming events from the gateway. The loop's turn assembler
/// folds these into content blocks.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    BlockStart { index: usize, start: BlockStart },
    BlockDelta { index: usize, delta: BlockDelta },
    BlockStop { index: usize },
    MessageStop {
        stop_reason: StopReason,
        usage: Option<Usage>,
    },
}

/// The core gateway trait.
///
/// Every provider backend implements this. The loop controller calls
/// `generate()` or `stream()` without knowing which provider is behind it.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// A human-readable name for this gateway (e.g., "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn generate(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError>;

    /// Send a request and get a stream of low-level events.
    ///
    /// Default implementation calls `generate()` and synthesizes the event
    /// sequence from the complete response — one start/delta/stop triple
    /// per block, then a message-stop. Scripted test gateways get a
    /// working streaming path for free this way.
    async fn stream(
        &self,
        request: GatewayRequest,
    ) -> Result<
        tokio::sync::mpsc::Receiver<Result<GatewayEvent, GatewayError>>,
        GatewayError,
    > {
        let response = self.generate(request).await?;
        // Capacity covers every synthesized event, so sends cannot block.
        let (tx, rx) = tokio::sync::mpsc::channel(response.content.len() * 3 + 1);

        for (index, block) in response.content.iter().enumerate() {
            match block {
                ContentBlock::Text { text } => {
                    let _ = tx
                        .send(Ok(GatewayEvent::BlockStart {
                            index,
                            start: BlockStart::Text,
                        }))
                        .await;
                    let _ = tx
                        .send(Ok(GatewayEvent::BlockDelta {
                            index,
                            delta: BlockDelta::Text(text.clone()),
                        }))
                        .await;
                }
                ContentBlock::ToolUse { id, name, input } => {
                    let _ = tx
                        .send(Ok(GatewayEvent::BlockStart {
                            index,
                            start: BlockStart::ToolUse {
                                id: id.clone(),
                                name: name.clone(),
                            },
                        }))
                        .await;
                    let json = serde_json::to_string(input).unwrap_or_default();
                    let _ = tx
                        .send(Ok(GatewayEvent::BlockDelta {
                            index,
                            delta: BlockDelta::InputJson(json),
                        }))
                        .await;
                }
                ContentBlock::ToolResult { .. } => {
                    // Responses never contain tool_result blocks; skip.
                    continue;
                }
            }
            let _ = tx.send(Ok(GatewayEvent::BlockStop { index })).await;
        }

        let _ = tx
            .send(Ok(GatewayEvent::MessageStop {
                stop_reason: response.stop_reason,
                usage: response.usage,
            }))
            .await;

        Ok(rx)
    }
}

//! Anthropic Messages API gateway.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Streaming via SSE, deserialized into typed wire events — no
//!   `serde_json::Value` probing anywhere on the read path
//!
//! `stop_reason` is parsed against the closed set immediately; an unknown
//! value is surfaced as a fatal error rather than passed through.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use windlass_core::error::GatewayError;
use windlass_core::gateway::{
    BlockDelta, BlockStart, GatewayEvent, GatewayRequest, GatewayResponse, LlmGateway, StopReason,
    ToolDefinition, Usage,
};
use windlass_core::message::{ContentBlock, Role, Turn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Anthropic native Messages API gateway.
pub struct AnthropicGateway {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicGateway {
    /// Create a new Anthropic gateway with the default request timeout.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_timeout(api_key, DEFAULT_TIMEOUT_SECS)
    }

    /// Create a gateway with an explicit request timeout in seconds.
    pub fn with_timeout(api_key: impl Into<String>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Convert transcript turns to wire messages with content blocks.
    fn to_wire_messages(turns: &[Turn]) -> Vec<WireMessage> {
        turns
            .iter()
            .map(|turn| WireMessage {
                role: match turn.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: turn.content.iter().map(Self::to_wire_block).collect(),
            })
            .collect()
    }

    fn to_wire_block(block: &ContentBlock) -> WireRequestBlock {
        match block {
            ContentBlock::Text { text } => WireRequestBlock::Text { text: text.clone() },
            ContentBlock::ToolUse { id, name, input } => WireRequestBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            },
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => WireRequestBlock::ToolResult {
                tool_use_id: tool_use_id.clone(),
                // The wire format wants a string; structured payloads are
                // serialized verbatim.
                content: match content {
                    serde_json::Value::String(s) => s.clone(),
                    other => serde_json::to_string(other).unwrap_or_default(),
                },
                is_error: *is_error,
            },
        }
    }

    fn to_wire_tools(tools: &[ToolDefinition]) -> Vec<WireTool> {
        tools
            .iter()
            .map(|t| WireTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect()
    }

    fn wire_request(&self, request: &GatewayRequest, stream: bool) -> WireRequest {
        WireRequest {
            model: request.model.clone(),
            messages: Self::to_wire_messages(&request.turns),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.system.clone(),
            tools: Self::to_wire_tools(&request.tools),
            stream,
        }
    }

    async fn send(
        &self,
        body: &WireRequest,
        accept_sse: bool,
    ) -> Result<reqwest::Response, GatewayError> {
        let url = format!("{}/v1/messages", self.base_url);

        let mut req = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json");
        if accept_sse {
            req = req.header("Accept", "text/event-stream");
        }

        let response = req.json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout(e.to_string())
            } else {
                GatewayError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status == 429 {
            return Err(GatewayError::RateLimited {
                retry_after_secs: 5,
            });
        }
        if status == 401 || status == 403 {
            return Err(GatewayError::AuthenticationFailed(
                "Invalid Anthropic API key".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(GatewayError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl LlmGateway for AnthropicGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let body = self.wire_request(&request, false);
        debug!(gateway = "anthropic", model = %request.model, "Sending generate request");

        let response = self.send(&body, false).await?;
        let wire: WireResponse = response.json().await.map_err(|e| GatewayError::ApiError {
            status_code: 200,
            message: format!("Failed to parse Anthropic response: {e}"),
        })?;

        wire_to_gateway_response(wire)
    }

    async fn stream(
        &self,
        request: GatewayRequest,
    ) -> Result<
        tokio::sync::mpsc::Receiver<Result<GatewayEvent, GatewayError>>,
        GatewayError,
    > {
        let body = self.wire_request(&request, true);
        debug!(gateway = "anthropic", model = %request.model, "Sending streaming request");

        let response = self.send(&body, true).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            // stop_reason arrives in message_delta; message_stop closes.
            let mut pending_stop: Option<StopReason> = None;
            let mut input_tokens: Option<u32> = None;
            let mut output_tokens: Option<u32> = None;

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(GatewayError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if line.is_empty() || line.starts_with(':') || line.starts_with("event: ") {
                        // The data payload carries its own "type" tag; the
                        // event: line is redundant for us.
                        continue;
                    }

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let data = data.trim();
                    if data.is_empty() {
                        continue;
                    }

                    let event: SseEvent = match serde_json::from_str(data) {
                        Ok(ev) => ev,
                        Err(e) => {
                            trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                            continue;
                        }
                    };

                    match event {
                        SseEvent::MessageStart { message } => {
                            input_tokens = message.usage.and_then(|u| u.input_tokens);
                        }
                        SseEvent::ContentBlockStart {
                            index,
                            content_block,
                        } => {
                            let start = match content_block {
                                WireBlockOpen::Text { .. } => BlockStart::Text,
                                WireBlockOpen::ToolUse { id, name } => {
                                    BlockStart::ToolUse { id, name }
                                }
                            };
                            if tx
                                .send(Ok(GatewayEvent::BlockStart { index, start }))
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                        SseEvent::ContentBlockDelta { index, delta } => {
                            let delta = match delta {
                                WireDelta::TextDelta { text } => BlockDelta::Text(text),
                                WireDelta::InputJsonDelta { partial_json } => {
                                    BlockDelta::InputJson(partial_json)
                                }
                            };
                            if tx
                                .send(Ok(GatewayEvent::BlockDelta { index, delta }))
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                        SseEvent::ContentBlockStop { index } => {
                            if tx
                                .send(Ok(GatewayEvent::BlockStop { index }))
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                        SseEvent::MessageDelta { delta, usage } => {
                            if let Some(raw) = delta.stop_reason {
                                match StopReason::from_provider(&raw) {
                                    Ok(sr) => pending_stop = Some(sr),
                                    Err(e) => {
                                        let _ = tx.send(Err(e)).await;
                                        return;
                                    }
                                }
                            }
                            if let Some(u) = usage {
                                output_tokens = Some(u.output_tokens);
                            }
                        }
                        SseEvent::MessageStop => {
                            let Some(stop_reason) = pending_stop else {
                                let _ = tx
                                    .send(Err(GatewayError::StreamInterrupted(
                                        "message_stop before any stop_reason".into(),
                                    )))
                                    .await;
                                return;
                            };
                            let usage = match (input_tokens, output_tokens) {
                                (Some(i), Some(o)) => Some(Usage {
                                    input_tokens: i,
                                    output_tokens: o,
                                }),
                                _ => None,
                            };
                            let _ = tx
                                .send(Ok(GatewayEvent::MessageStop { stop_reason, usage }))
                                .await;
                            return;
                        }
                        SseEvent::Ping => {}
                        SseEvent::Error { error } => {
                            let _ = tx
                                .send(Err(GatewayError::StreamInterrupted(error.message)))
                                .await;
                            return;
                        }
                    }
                }
            }

            // Stream ended without message_stop.
            let _ = tx
                .send(Err(GatewayError::StreamInterrupted(
                    "connection closed before message_stop".into(),
                )))
                .await;
        });

        Ok(rx)
    }
}

/// Convert a complete wire response into the domain response.
fn wire_to_gateway_response(wire: WireResponse) -> Result<GatewayResponse, GatewayError> {
    let stop_reason = match wire.stop_reason {
        Some(raw) => StopReason::from_provider(&raw)?,
        None => {
            return Err(GatewayError::IllegalStopReason(
                "(missing stop_reason)".into(),
            ));
        }
    };

    let content = wire
        .content
        .into_iter()
        .map(|block| match block {
            WireResponseBlock::Text { text } => ContentBlock::Text { text },
            // Fields default when absent so the loop can run its own
            // malformed-block check instead of dying inside serde.
            WireResponseBlock::ToolUse { id, name, input } => {
                ContentBlock::ToolUse { id, name, input }
            }
        })
        .collect();

    let usage = wire.usage.map(|u| Usage {
        input_tokens: u.input_tokens,
        output_tokens: u.output_tokens,
    });

    Ok(GatewayResponse {
        content,
        stop_reason,
        model: wire.model,
        usage,
    })
}

// --- Anthropic wire types (request) ---

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<WireRequestBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireRequestBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

// --- Anthropic wire types (response) ---

#[derive(Debug, Deserialize)]
struct WireResponse {
    model: String,
    content: Vec<WireResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
}

// --- Anthropic wire types (SSE) ---

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SseEvent {
    MessageStart {
        message: WireMessageStart,
    },
    ContentBlockStart {
        index: usize,
        content_block: WireBlockOpen,
    },
    ContentBlockDelta {
        index: usize,
        delta: WireDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: WireMessageDelta,
        #[serde(default)]
        usage: Option<WireDeltaUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: WireError,
    },
}

#[derive(Debug, Deserialize)]
struct WireMessageStart {
    #[serde(default)]
    usage: Option<WireStartUsage>,
}

#[derive(Debug, Deserialize)]
struct WireStartUsage {
    #[serde(default)]
    input_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlockOpen {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Deserialize)]
struct WireMessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDeltaUsage {
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    message: String,
}

//! Shared test helpers for loop tests.

use async_trait::async_trait;
use std::sync::Mutex;

use windlass_core::error::GatewayError;
use windlass_core::gateway::{
    GatewayRequest, GatewayResponse, LlmGateway, StopReason, Usage,
};
use windlass_core::message::ContentBlock;
use windlass_core::tool::{Tool, ToolOutput};

/// A gateway that returns a sequence of scripted responses.
///
/// Each call to `generate` pops the next response. Panics when the script
/// runs dry, unless built with `looping` — then the last response repeats
/// forever (for iteration-cap tests against an always-tool_use provider).
pub struct ScriptedGateway {
    responses: Vec<GatewayResponse>,
    cursor: Mutex<usize>,
    looping: bool,
}

impl ScriptedGateway {
    pub fn new(responses: Vec<GatewayResponse>) -> Self {
        Self {
            responses,
            cursor: Mutex::new(0),
            looping: false,
        }
    }

    /// A gateway that returns the same response on every call.
    pub fn looping(response: GatewayResponse) -> Self {
        Self {
            responses: vec![response],
            cursor: Mutex::new(0),
            looping: true,
        }
    }

    pub fn call_count(&self) -> usize {
        *self.cursor.lock().unwrap()
    }
}

#[async_trait]
impl LlmGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let mut cursor = self.cursor.lock().unwrap();
        let index = if self.looping {
            (*cursor).min(self.responses.len() - 1)
        } else {
            *cursor
        };

        let Some(response) = self.responses.get(index) else {
            panic!(
                "ScriptedGateway: no more responses (call #{}, have {})",
                *cursor,
                self.responses.len()
            );
        };

        *cursor += 1;
        Ok(response.clone())
    }
}

/// A final text answer (`end_turn`).
pub fn text_response(text: &str) -> GatewayResponse {
    GatewayResponse {
        content: vec![ContentBlock::text(text)],
        stop_reason: StopReason::EndTurn,
        model: "scripted-model".into(),
        usage: Some(Usage {
            input_tokens: 10,
            output_tokens: 5,
        }),
    }
}

/// A `tool_use` turn with the given calls, preceded by optional thought text.
pub fn tool_use_response(thought: &str, calls: Vec<(&str, &str, serde_json::Value)>) -> GatewayResponse {
    let mut content = Vec::new();
    if !thought.is_empty() {
        content.push(ContentBlock::text(thought));
    }
    for (id, name, input) in calls {
        content.push(ContentBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        });
    }
    GatewayResponse {
        content,
        stop_reason: StopReason::ToolUse,
        model: "scripted-model".into(),
        usage: None,
    }
}

/// A tool that echoes its `text` argument back.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echoes back the input"
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }
    async fn execute(&self, input: serde_json::Value) -> ToolOutput {
        match input["text"].as_str() {
            Some(text) => ToolOutput::text(text),
            None => ToolOutput::invalid("Missing 'text' argument"),
        }
    }
}

/// A tool that accepts exactly one code and names it on rejection, so the
/// model can self-correct on the next round.
pub struct GatedTool;

#[async_trait]
impl Tool for GatedTool {
    fn name(&self) -> &str {
        "unlock"
    }
    fn description(&self) -> &str {
        "Unlocks the vault given the correct code"
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "code": { "type": "string" } },
            "required": ["code"]
        })
    }
    async fn execute(&self, input: serde_json::Value) -> ToolOutput {
        match input["code"].as_str() {
            Some("secret_code") => ToolOutput::text("vault unlocked"),
            Some(_) => ToolOutput::invalid("invalid code; the correct code is 'secret_code'"),
            None => ToolOutput::invalid("Missing 'code' argument"),
        }
    }
}

/// A tool with an internal defect: it always panics. Used to verify that
/// escaping panics propagate out of the loop uncaught.
pub struct DefectiveTool;

#[async_trait]
impl Tool for DefectiveTool {
    fn name(&self) -> &str {
        "defective"
    }
    fn description(&self) -> &str {
        "Always panics"
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(&self, _input: serde_json::Value) -> ToolOutput {
        panic!("defective tool: internal invariant violated");
    }
}

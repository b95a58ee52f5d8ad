//! The bounded agent loop.
//!
//! One [`LoopController`] is constructed per request, given an explicit
//! gateway and tool registry. It drives iterations of LLM call + sequential
//! tool execution until the provider signals completion or the iteration
//! cap fires, and hands the finished [`RunMetadata`] back to the caller.
//!
//! Failure policy: a tool's own `{"error": ...}` payload is data — it is
//! recorded with `is_error = true` and fed back to the model on the next
//! round. Unknown tool names, malformed tool_use blocks, and illegal
//! stop_reasons are contract violations and propagate uncaught. A panic
//! inside a tool is a framework defect and unwinds through the loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use windlass_config::AppConfig;
use windlass_core::error::{Error, GatewayError, Result};
use windlass_core::gateway::{GatewayEvent, GatewayRequest, LlmGateway, StopReason};
use windlass_core::message::{ContentBlock, Turn};
use windlass_core::run::{RunMetadata, ToolInteraction};
use windlass_core::tool::ToolRegistry;

use crate::assembler::{AssemblerSignal, TurnAssembler};
use crate::stream_event::StreamEvent;

/// Caller-facing text appended when the iteration cap fires. The run never
/// truncates silently.
const STEP_LIMIT_MESSAGE: &str =
    "I've reached my step limit for this request, so I'm stopping here with what I have so far.";

/// The result of one completed run: final text plus the replayable trace.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub text: String,
    pub metadata: RunMetadata,
}

/// Drives one user turn through bounded iterations.
///
/// Owns nothing across turns: the transcript belongs to the caller, the
/// gateway and registry arrive by injection, and the metadata is handed
/// back when the run finishes.
pub struct LoopController {
    gateway: Arc<dyn LlmGateway>,
    registry: Arc<ToolRegistry>,
    model: String,
    system_prompt: Option<String>,
    temperature: f32,
    max_tokens: u32,
    max_iterations: u32,
    max_stream_iterations: u32,
}

impl LoopController {
    pub fn new(gateway: Arc<dyn LlmGateway>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            gateway,
            registry,
            model: "claude-sonnet-4-20250514".into(),
            system_prompt: None,
            temperature: 0.7,
            max_tokens: 4096,
            max_iterations: 10,
            max_stream_iterations: 8,
        }
    }

    /// Construct from loaded application config.
    pub fn from_config(
        gateway: Arc<dyn LlmGateway>,
        registry: Arc<ToolRegistry>,
        config: &AppConfig,
    ) -> Self {
        Self::new(gateway, registry)
            .with_model(config.default_model.clone())
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens)
            .with_max_iterations(config.runtime.max_iterations)
            .with_max_stream_iterations(config.runtime.max_stream_iterations)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = max;
        self
    }

    /// Iteration cap for the non-streaming path.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Iteration cap for the streaming path.
    pub fn with_max_stream_iterations(mut self, max: u32) -> Self {
        self.max_stream_iterations = max;
        self
    }

    fn request(&self, transcript: &[Turn]) -> GatewayRequest {
        GatewayRequest {
            model: self.model.clone(),
            system: self.system_prompt.clone(),
            turns: transcript.to_vec(),
            tools: self.registry.definitions(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// Run one user turn to completion, non-streaming.
    ///
    /// Appends the user message, all assistant turns, and all tool-result
    /// turns to `transcript`. Returns the final text plus metadata; the
    /// caller persists both.
    pub async fn run(&self, transcript: &mut Vec<Turn>, user_message: &str) -> Result<RunOutcome> {
        transcript.push(Turn::user(user_message));
        let mut metadata = RunMetadata::new();
        let mut accumulated: Vec<String> = Vec::new();

        info!(
            run_id = %metadata.run_id,
            prior_turns = transcript.len() - 1,
            "Starting run"
        );

        loop {
            debug!(
                run_id = %metadata.run_id,
                iteration = metadata.iteration_count + 1,
                "Loop iteration"
            );

            let response = self.gateway.generate(self.request(transcript)).await?;

            match response.stop_reason {
                StopReason::ToolUse => {
                    if response.content.is_empty() {
                        return Err(GatewayError::NoToolUseBlocks.into());
                    }
                    let calls = extract_tool_uses(&response.content)?;
                    if calls.is_empty() {
                        // No acted-upon tool_use is functionally a normal end.
                        return Ok(self.finalize(
                            transcript,
                            response.content,
                            metadata,
                            StopReason::ToolUse,
                        ));
                    }

                    let iteration = metadata.iteration_count + 1;
                    let turn_text = Turn::assistant(response.content.clone()).text();
                    if !turn_text.is_empty() {
                        accumulated.push(turn_text);
                    }
                    transcript.push(Turn::assistant(response.content));

                    // Strictly sequential, in the order received.
                    let mut results = Vec::with_capacity(calls.len());
                    for (id, name, input) in &calls {
                        metadata.tool_interactions.push(ToolInteraction::ToolUse {
                            tool_id: id.clone(),
                            tool_name: name.clone(),
                            input: input.clone(),
                            iteration,
                        });

                        let output = self.registry.execute(name, input.clone()).await?;
                        if output.is_error {
                            debug!(tool = %name, "Tool reported an error payload");
                        }

                        metadata.tool_interactions.push(ToolInteraction::ToolResult {
                            tool_id: id.clone(),
                            tool_name: name.clone(),
                            output: output.payload.clone(),
                            is_error: output.is_error,
                            iteration,
                        });
                        results.push(ContentBlock::ToolResult {
                            tool_use_id: id.clone(),
                            content: output.payload,
                            is_error: output.is_error,
                        });
                    }
                    transcript.push(Turn::tool_results(results));
                    metadata.iteration_count = iteration;

                    if metadata.iteration_count >= self.max_iterations {
                        warn!(
                            run_id = %metadata.run_id,
                            iterations = metadata.iteration_count,
                            "Iteration cap reached"
                        );
                        metadata.stop_reason = StopReason::MaxIterations;
                        metadata.warning =
                            Some("iteration cap reached before the model finished".into());
                        return Ok(RunOutcome {
                            text: step_limit_text(&accumulated),
                            metadata,
                        });
                    }
                }

                // end_turn, or a recorded truncation outcome. All are
                // terminal and none is an error.
                terminal => {
                    return Ok(self.finalize(transcript, response.content, metadata, terminal));
                }
            }
        }
    }

    /// Run one user turn with live event streaming.
    ///
    /// Typed events go out on `events` as they happen; the final `complete`
    /// event carries the full cumulative metadata. Wire framing is the
    /// consumer's job, not the loop's.
    pub async fn run_stream(
        &self,
        transcript: &mut Vec<Turn>,
        user_message: &str,
        events: mpsc::Sender<StreamEvent>,
    ) -> Result<RunOutcome> {
        transcript.push(Turn::user(user_message));
        let mut metadata = RunMetadata::new();
        let mut accumulated: Vec<String> = Vec::new();

        info!(
            run_id = %metadata.run_id,
            prior_turns = transcript.len() - 1,
            "Starting streaming run"
        );

        loop {
            let mut rx = self.gateway.stream(self.request(transcript)).await?;
            let mut assembler = TurnAssembler::new();
            let mut stop: Option<StopReason> = None;

            while let Some(event) = rx.recv().await {
                let event = event?;
                if let GatewayEvent::MessageStop { stop_reason, .. } = &event {
                    stop = Some(*stop_reason);
                }
                match assembler.apply(event) {
                    AssemblerSignal::Text(fragment) => {
                        let _ = events.send(StreamEvent::Text { content: fragment }).await;
                    }
                    AssemblerSignal::ToolUseAssembled { id, name, input } => {
                        let _ = events
                            .send(StreamEvent::ToolUseStart {
                                tool_name: name,
                                tool_id: id,
                                input,
                            })
                            .await;
                    }
                    AssemblerSignal::Quiet => {}
                }
            }

            let Some(stop_reason) = stop else {
                return Err(GatewayError::StreamInterrupted(
                    "stream closed without message_stop".into(),
                )
                .into());
            };
            let content = assembler.finish();

            match stop_reason {
                StopReason::ToolUse => {
                    if content.is_empty() {
                        return Err(GatewayError::NoToolUseBlocks.into());
                    }
                    let calls = extract_tool_uses(&content)?;
                    if calls.is_empty() {
                        let outcome =
                            self.finalize(transcript, content, metadata, StopReason::ToolUse);
                        let _ = events
                            .send(StreamEvent::Complete {
                                metadata: outcome.metadata.clone(),
                            })
                            .await;
                        return Ok(outcome);
                    }

                    let iteration = metadata.iteration_count + 1;
                    let turn_text = Turn::assistant(content.clone()).text();
                    if !turn_text.is_empty() {
                        accumulated.push(turn_text);
                    }
                    transcript.push(Turn::assistant(content));
                    metadata.iteration_count = iteration;

                    if metadata.iteration_count >= self.max_stream_iterations {
                        // Cap struck mid-batch: the requested calls are
                        // recorded but never dispatched, so these tool_use
                        // entries stay unpaired.
                        warn!(
                            run_id = %metadata.run_id,
                            iterations = metadata.iteration_count,
                            pending_calls = calls.len(),
                            "Iteration cap reached mid-batch"
                        );
                        for (id, name, input) in calls {
                            metadata.tool_interactions.push(ToolInteraction::ToolUse {
                                tool_id: id,
                                tool_name: name,
                                input,
                                iteration,
                            });
                        }
                        metadata.stop_reason = StopReason::MaxIterations;
                        metadata.warning =
                            Some("iteration cap reached before the model finished".into());

                        let _ = events
                            .send(StreamEvent::Text {
                                content: STEP_LIMIT_MESSAGE.into(),
                            })
                            .await;
                        let _ = events
                            .send(StreamEvent::Complete {
                                metadata: metadata.clone(),
                            })
                            .await;
                        return Ok(RunOutcome {
                            text: step_limit_text(&accumulated),
                            metadata,
                        });
                    }

                    let mut results = Vec::with_capacity(calls.len());
                    for (id, name, input) in &calls {
                        metadata.tool_interactions.push(ToolInteraction::ToolUse {
                            tool_id: id.clone(),
                            tool_name: name.clone(),
                            input: input.clone(),
                            iteration,
                        });

                        let output = self.registry.execute(name, input.clone()).await?;

                        let _ = events
                            .send(StreamEvent::ToolResult {
                                tool_name: name.clone(),
                                result: output.payload.clone(),
                                is_error: output.is_error,
                            })
                            .await;
                        metadata.tool_interactions.push(ToolInteraction::ToolResult {
                            tool_id: id.clone(),
                            tool_name: name.clone(),
                            output: output.payload.clone(),
                            is_error: output.is_error,
                            iteration,
                        });
                        results.push(ContentBlock::ToolResult {
                            tool_use_id: id.clone(),
                            content: output.payload,
                            is_error: output.is_error,
                        });
                    }
                    transcript.push(Turn::tool_results(results));
                }

                terminal => {
                    let outcome = self.finalize(transcript, content, metadata, terminal);
                    let _ = events
                        .send(StreamEvent::Complete {
                            metadata: outcome.metadata.clone(),
                        })
                        .await;
                    return Ok(outcome);
                }
            }
        }
    }

    /// Close out a normally-terminated run: append the final assistant
    /// turn and record the terminal stop_reason.
    fn finalize(
        &self,
        transcript: &mut Vec<Turn>,
        content: Vec<ContentBlock>,
        mut metadata: RunMetadata,
        stop_reason: StopReason,
    ) -> RunOutcome {
        let turn = Turn::assistant(content);
        let text = turn.text();
        transcript.push(turn);

        metadata.stop_reason = stop_reason;
        if stop_reason == StopReason::MaxTokens {
            metadata.warning = Some("response truncated at the provider token limit".into());
        }

        info!(
            run_id = %metadata.run_id,
            iterations = metadata.iteration_count,
            stop_reason = metadata.stop_reason.as_str(),
            tool_calls = metadata.executed_calls(),
            "Run complete"
        );

        RunOutcome { text, metadata }
    }
}

/// Pull the tool_use blocks out of an assistant turn, in order. A block
/// missing its id, name, or input is a provider contract violation and
/// fails the whole run; it is never silently skipped.
fn extract_tool_uses(
    content: &[ContentBlock],
) -> Result<Vec<(String, String, serde_json::Value)>> {
    let mut calls = Vec::new();
    for block in content {
        if let ContentBlock::ToolUse { id, name, input } = block {
            if id.is_empty() || name.is_empty() || input.is_null() {
                return Err(Error::Gateway(GatewayError::MalformedToolUse(format!(
                    "id='{id}', name='{name}', input={input}"
                ))));
            }
            calls.push((id.clone(), name.clone(), input.clone()));
        }
    }
    Ok(calls)
}

fn step_limit_text(accumulated: &[String]) -> String {
    if accumulated.is_empty() {
        STEP_LIMIT_MESSAGE.to_string()
    } else {
        format!("{}\n\n{}", accumulated.join("\n\n"), STEP_LIMIT_MESSAGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use serde_json::json;
    use windlass_core::error::ToolError;
    use windlass_core::gateway::GatewayResponse;

    fn registry_with(tools: Vec<Box<dyn windlass_core::tool::Tool>>) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool);
        }
        Arc::new(registry)
    }

    fn controller(gateway: ScriptedGateway, registry: Arc<ToolRegistry>) -> LoopController {
        LoopController::new(Arc::new(gateway), registry).with_model("scripted-model")
    }

    #[tokio::test]
    async fn plain_text_answer_ends_in_zero_iterations() {
        let gateway = ScriptedGateway::new(vec![text_response("Hello! How can I help?")]);
        let ctl = controller(gateway, registry_with(vec![]));

        let mut transcript = Vec::new();
        let outcome = ctl.run(&mut transcript, "Hello!").await.unwrap();

        assert_eq!(outcome.text, "Hello! How can I help?");
        assert_eq!(outcome.metadata.iteration_count, 0);
        assert_eq!(outcome.metadata.stop_reason, StopReason::EndTurn);
        assert!(outcome.metadata.tool_interactions.is_empty());
        // user + assistant
        assert_eq!(transcript.len(), 2);
    }

    #[tokio::test]
    async fn tool_call_then_answer() {
        let gateway = ScriptedGateway::new(vec![
            tool_use_response(
                "Let me echo that.",
                vec![("toolu_1", "echo", json!({"text": "hi"}))],
            ),
            text_response("The echo said: hi"),
        ]);
        let ctl = controller(gateway, registry_with(vec![Box::new(EchoTool)]));

        let mut transcript = Vec::new();
        let outcome = ctl.run(&mut transcript, "Echo hi for me").await.unwrap();

        assert_eq!(outcome.text, "The echo said: hi");
        assert_eq!(outcome.metadata.iteration_count, 1);
        assert_eq!(outcome.metadata.stop_reason, StopReason::EndTurn);
        assert_eq!(outcome.metadata.tool_interactions.len(), 2);
        assert!(outcome.metadata.is_paired());
        // user + assistant(tool_use) + tool_results + assistant
        assert_eq!(transcript.len(), 4);
    }

    #[tokio::test]
    async fn trace_length_is_twice_the_executed_calls() {
        let gateway = ScriptedGateway::new(vec![
            tool_use_response(
                "",
                vec![
                    ("toolu_a", "echo", json!({"text": "one"})),
                    ("toolu_b", "echo", json!({"text": "two"})),
                ],
            ),
            tool_use_response("", vec![("toolu_c", "echo", json!({"text": "three"}))]),
            text_response("done"),
        ]);
        let ctl = controller(gateway, registry_with(vec![Box::new(EchoTool)]));

        let mut transcript = Vec::new();
        let outcome = ctl.run(&mut transcript, "go").await.unwrap();

        assert_eq!(outcome.metadata.executed_calls(), 3);
        assert_eq!(
            outcome.metadata.tool_interactions.len(),
            2 * outcome.metadata.executed_calls()
        );
        assert!(outcome.metadata.is_paired());
    }

    #[tokio::test]
    async fn results_follow_tool_use_order_exactly() {
        let gateway = ScriptedGateway::new(vec![
            tool_use_response(
                "",
                vec![
                    ("toolu_1", "echo", json!({"text": "first"})),
                    ("toolu_2", "echo", json!({"text": "second"})),
                    ("toolu_3", "echo", json!({"text": "third"})),
                ],
            ),
            text_response("done"),
        ]);
        let ctl = controller(gateway, registry_with(vec![Box::new(EchoTool)]));

        let mut transcript = Vec::new();
        let outcome = ctl.run(&mut transcript, "go").await.unwrap();

        let ids: Vec<&str> = outcome
            .metadata
            .tool_interactions
            .iter()
            .map(|i| match i {
                ToolInteraction::ToolUse { tool_id, .. } => tool_id.as_str(),
                ToolInteraction::ToolResult { tool_id, .. } => tool_id.as_str(),
            })
            .collect();
        // use/result strictly interleaved, in emission order
        assert_eq!(
            ids,
            vec!["toolu_1", "toolu_1", "toolu_2", "toolu_2", "toolu_3", "toolu_3"]
        );
    }

    #[tokio::test]
    async fn iteration_cap_is_exact_against_relentless_tool_use() {
        let gateway = ScriptedGateway::looping(tool_use_response(
            "Searching again.",
            vec![("toolu_n", "echo", json!({"text": "again"}))],
        ));
        let ctl = controller(gateway, registry_with(vec![Box::new(EchoTool)]))
            .with_max_iterations(3);

        let mut transcript = Vec::new();
        let outcome = ctl.run(&mut transcript, "never stop").await.unwrap();

        assert_eq!(outcome.metadata.iteration_count, 3);
        assert_eq!(outcome.metadata.stop_reason, StopReason::MaxIterations);
        assert!(outcome.text.contains("reached my step limit"));
        assert!(outcome.metadata.warning.is_some());
        // The non-streaming path finishes its batch before stopping.
        assert!(outcome.metadata.is_paired());
    }

    #[tokio::test]
    async fn four_search_request_capped_at_one_iteration() {
        let gateway = ScriptedGateway::looping(tool_use_response(
            "Search 1 of 4.",
            vec![("toolu_s1", "echo", json!({"text": "query one"}))],
        ));
        let ctl = controller(gateway, registry_with(vec![Box::new(EchoTool)]))
            .with_max_iterations(1);

        let mut transcript = Vec::new();
        let outcome = ctl
            .run(&mut transcript, "run four searches")
            .await
            .unwrap();

        assert_eq!(outcome.metadata.iteration_count, 1);
        assert_eq!(outcome.metadata.stop_reason, StopReason::MaxIterations);
        assert!(outcome.text.contains("reached my step limit"));
    }

    #[tokio::test]
    async fn tool_use_with_zero_content_blocks_is_fatal() {
        let gateway = ScriptedGateway::new(vec![GatewayResponse {
            content: vec![],
            stop_reason: StopReason::ToolUse,
            model: "scripted-model".into(),
            usage: None,
        }]);
        let ctl = controller(gateway, registry_with(vec![]));

        let mut transcript = Vec::new();
        let err = ctl.run(&mut transcript, "hi").await.unwrap_err();
        assert!(err.to_string().contains("no tool_use blocks"));
    }

    #[tokio::test]
    async fn text_only_tool_use_is_a_normal_end() {
        let gateway = ScriptedGateway::new(vec![GatewayResponse {
            content: vec![ContentBlock::text("Actually, I'm done.")],
            stop_reason: StopReason::ToolUse,
            model: "scripted-model".into(),
            usage: None,
        }]);
        let ctl = controller(gateway, registry_with(vec![]));

        let mut transcript = Vec::new();
        let outcome = ctl.run(&mut transcript, "hi").await.unwrap();
        assert_eq!(outcome.text, "Actually, I'm done.");
        assert_eq!(outcome.metadata.stop_reason, StopReason::ToolUse);
        assert!(outcome.metadata.tool_interactions.is_empty());
    }

    #[tokio::test]
    async fn malformed_tool_use_block_is_fatal() {
        let gateway = ScriptedGateway::new(vec![tool_use_response(
            "",
            vec![("", "echo", json!({"text": "hi"}))],
        )]);
        let ctl = controller(gateway, registry_with(vec![Box::new(EchoTool)]));

        let mut transcript = Vec::new();
        let err = ctl.run(&mut transcript, "hi").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Gateway(GatewayError::MalformedToolUse(_))
        ));
    }

    #[tokio::test]
    async fn null_input_counts_as_malformed() {
        let gateway = ScriptedGateway::new(vec![tool_use_response(
            "",
            vec![("toolu_1", "echo", serde_json::Value::Null)],
        )]);
        let ctl = controller(gateway, registry_with(vec![Box::new(EchoTool)]));

        let mut transcript = Vec::new();
        assert!(ctl.run(&mut transcript, "hi").await.is_err());
    }

    #[tokio::test]
    async fn unknown_tool_name_is_fatal() {
        let gateway = ScriptedGateway::new(vec![tool_use_response(
            "",
            vec![("toolu_1", "grep", json!({"pattern": "x"}))],
        )]);
        let ctl = controller(gateway, registry_with(vec![Box::new(EchoTool)]));

        let mut transcript = Vec::new();
        let err = ctl.run(&mut transcript, "hi").await.unwrap_err();
        assert!(matches!(err, Error::Tool(ToolError::NotFound(name)) if name == "grep"));
    }

    #[tokio::test]
    #[should_panic(expected = "defective tool")]
    async fn tool_panic_propagates_uncaught() {
        let gateway = ScriptedGateway::new(vec![tool_use_response(
            "",
            vec![("toolu_1", "defective", json!({}))],
        )]);
        let ctl = controller(gateway, registry_with(vec![Box::new(DefectiveTool)]));

        let mut transcript = Vec::new();
        let _ = ctl.run(&mut transcript, "hi").await;
    }

    #[tokio::test]
    async fn tool_error_feeds_back_and_model_self_corrects() {
        let gateway = ScriptedGateway::new(vec![
            tool_use_response(
                "Trying a guess.",
                vec![("toolu_1", "unlock", json!({"code": "guess"}))],
            ),
            tool_use_response(
                "The error told me the code.",
                vec![("toolu_2", "unlock", json!({"code": "secret_code"}))],
            ),
            text_response("The vault is open."),
        ]);
        let ctl = controller(gateway, registry_with(vec![Box::new(GatedTool)]));

        let mut transcript = Vec::new();
        let outcome = ctl.run(&mut transcript, "open the vault").await.unwrap();

        assert_eq!(outcome.text, "The vault is open.");
        assert_eq!(outcome.metadata.iteration_count, 2);

        // First attempt recorded as an error payload, not an exception.
        match &outcome.metadata.tool_interactions[1] {
            ToolInteraction::ToolResult {
                output, is_error, ..
            } => {
                assert!(*is_error);
                assert!(output["error"]
                    .as_str()
                    .unwrap()
                    .contains("secret_code"));
            }
            other => panic!("Expected a tool_result entry, got {other:?}"),
        }
        // Second attempt succeeded.
        match &outcome.metadata.tool_interactions[3] {
            ToolInteraction::ToolResult { is_error, .. } => assert!(!is_error),
            other => panic!("Expected a tool_result entry, got {other:?}"),
        }

        // The error payload went back to the model as a tool_result turn.
        let feedback = &transcript[2];
        assert!(matches!(
            &feedback.content[0],
            ContentBlock::ToolResult { is_error: true, .. }
        ));
    }

    #[tokio::test]
    async fn max_tokens_is_a_recorded_outcome_not_an_error() {
        let gateway = ScriptedGateway::new(vec![GatewayResponse {
            content: vec![ContentBlock::text("Here is a very long ans")],
            stop_reason: StopReason::MaxTokens,
            model: "scripted-model".into(),
            usage: None,
        }]);
        let ctl = controller(gateway, registry_with(vec![]));

        let mut transcript = Vec::new();
        let outcome = ctl.run(&mut transcript, "write a novel").await.unwrap();
        assert_eq!(outcome.metadata.stop_reason, StopReason::MaxTokens);
        assert!(outcome.metadata.warning.is_some());
    }

    #[tokio::test]
    async fn streaming_emits_ordered_events_and_complete() {
        let gateway = ScriptedGateway::new(vec![
            tool_use_response(
                "Let me echo that.",
                vec![("toolu_1", "echo", json!({"text": "hi"}))],
            ),
            text_response("The echo said: hi"),
        ]);
        let ctl = controller(gateway, registry_with(vec![Box::new(EchoTool)]));

        let (tx, mut rx) = mpsc::channel(64);
        let mut transcript = Vec::new();
        let outcome = ctl
            .run_stream(&mut transcript, "Echo hi for me", tx)
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }

        let types: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(
            types,
            vec!["text", "tool_use_start", "tool_result", "text", "complete"]
        );

        match &events[1] {
            StreamEvent::ToolUseStart {
                tool_name, input, ..
            } => {
                assert_eq!(tool_name, "echo");
                assert_eq!(*input, json!({"text": "hi"}));
            }
            other => panic!("Expected tool_use_start, got {other:?}"),
        }
        match events.last().unwrap() {
            StreamEvent::Complete { metadata } => {
                assert_eq!(metadata.iteration_count, 1);
                assert_eq!(metadata.tool_interactions.len(), 2);
            }
            other => panic!("Expected complete, got {other:?}"),
        }
        assert_eq!(outcome.text, "The echo said: hi");
    }

    #[tokio::test]
    async fn streaming_cutoff_leaves_final_batch_unpaired() {
        let gateway = ScriptedGateway::looping(tool_use_response(
            "Once more.",
            vec![("toolu_n", "echo", json!({"text": "again"}))],
        ));
        let ctl = controller(gateway, registry_with(vec![Box::new(EchoTool)]))
            .with_max_stream_iterations(2);

        let (tx, mut rx) = mpsc::channel(64);
        let mut transcript = Vec::new();
        let outcome = ctl
            .run_stream(&mut transcript, "never stop", tx)
            .await
            .unwrap();

        assert_eq!(outcome.metadata.iteration_count, 2);
        assert_eq!(outcome.metadata.stop_reason, StopReason::MaxIterations);
        assert!(outcome.text.contains("reached my step limit"));

        // Iteration 1 paired; iteration 2 recorded but never dispatched.
        assert!(!outcome.metadata.is_paired());
        assert_eq!(outcome.metadata.executed_calls(), 1);
        assert_eq!(outcome.metadata.tool_interactions.len(), 3);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        // The caller sees the explicit limit message before complete.
        let n = events.len();
        assert!(matches!(
            &events[n - 2],
            StreamEvent::Text { content } if content.contains("reached my step limit")
        ));
        match &events[n - 1] {
            StreamEvent::Complete { metadata } => {
                assert_eq!(metadata.stop_reason, StopReason::MaxIterations);
                assert_eq!(metadata.iteration_count, 2);
            }
            other => panic!("Expected complete, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn streaming_zero_content_tool_use_is_fatal() {
        let gateway = ScriptedGateway::new(vec![GatewayResponse {
            content: vec![],
            stop_reason: StopReason::ToolUse,
            model: "scripted-model".into(),
            usage: None,
        }]);
        let ctl = controller(gateway, registry_with(vec![]));

        let (tx, _rx) = mpsc::channel(64);
        let mut transcript = Vec::new();
        let err = ctl.run_stream(&mut transcript, "hi", tx).await.unwrap_err();
        assert!(err.to_string().contains("no tool_use blocks"));
    }
}

//! Turn assembler — folds low-level gateway events into content blocks.
//!
//! The gateway emits block-start / block-delta / block-stop events; the
//! assembler accumulates them into the tagged [`ContentBlock`] union. Text
//! is surfaced fragment by fragment so the caller can forward it live. A
//! tool_use block surfaces only at block-stop, once its input JSON is
//! fully assembled — partial tool input is not actionable.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::trace;

use windlass_core::gateway::{BlockDelta, BlockStart, GatewayEvent};
use windlass_core::message::ContentBlock;

/// What the caller should do with the event it just fed in.
#[derive(Debug, Clone, PartialEq)]
pub enum AssemblerSignal {
    /// A text fragment, ready to forward to the live consumer.
    Text(String),

    /// A tool_use block whose input JSON is now complete.
    ToolUseAssembled {
        id: String,
        name: String,
        input: Value,
    },

    /// Nothing to surface for this event.
    Quiet,
}

/// A content block still under assembly.
#[derive(Debug)]
enum PartialBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input_json: String,
    },
}

/// Accumulates one assistant turn from a gateway event stream.
///
/// Blocks are keyed by the provider's block index, so deltas route to the
/// right block even if the provider skips indices.
#[derive(Debug, Default)]
pub struct TurnAssembler {
    blocks: BTreeMap<usize, PartialBlock>,
}

impl TurnAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one gateway event. Message-stop is the caller's concern; this
    /// only handles block-level events.
    pub fn apply(&mut self, event: GatewayEvent) -> AssemblerSignal {
        match event {
            GatewayEvent::BlockStart { index, start } => {
                trace!(index, "Content block started");
                let block = match start {
                    BlockStart::Text => PartialBlock::Text(String::new()),
                    BlockStart::ToolUse { id, name } => PartialBlock::ToolUse {
                        id,
                        name,
                        input_json: String::new(),
                    },
                };
                if self.blocks.insert(index, block).is_some() {
                    trace!(index, "Block index restarted, previous content dropped");
                }
                AssemblerSignal::Quiet
            }

            GatewayEvent::BlockDelta { index, delta } => {
                let Some(block) = self.blocks.get_mut(&index) else {
                    trace!(index, "Delta for unknown block index, dropped");
                    return AssemblerSignal::Quiet;
                };
                match (block, delta) {
                    (PartialBlock::Text(buf), BlockDelta::Text(fragment)) => {
                        buf.push_str(&fragment);
                        AssemblerSignal::Text(fragment)
                    }
                    (PartialBlock::ToolUse { input_json, .. }, BlockDelta::InputJson(fragment)) => {
                        input_json.push_str(&fragment);
                        AssemblerSignal::Quiet
                    }
                    _ => {
                        trace!(index, "Delta kind does not match block kind, dropped");
                        AssemblerSignal::Quiet
                    }
                }
            }

            GatewayEvent::BlockStop { index } => match self.blocks.get(&index) {
                Some(PartialBlock::ToolUse {
                    id,
                    name,
                    input_json,
                }) => AssemblerSignal::ToolUseAssembled {
                    id: id.clone(),
                    name: name.clone(),
                    input: parse_input(input_json),
                },
                _ => AssemblerSignal::Quiet,
            },

            GatewayEvent::MessageStop { .. } => AssemblerSignal::Quiet,
        }
    }

    /// Consume the assembler and produce the finished content blocks, in
    /// ascending block-index order (the provider's emission order).
    pub fn finish(self) -> Vec<ContentBlock> {
        self.blocks
            .into_values()
            .map(|block| match block {
                PartialBlock::Text(text) => ContentBlock::Text { text },
                PartialBlock::ToolUse {
                    id,
                    name,
                    input_json,
                } => ContentBlock::ToolUse {
                    id,
                    name,
                    input: parse_input(&input_json),
                },
            })
            .collect()
    }
}

/// An empty accumulation means a no-argument call; anything that fails to
/// parse becomes null and is caught by the loop's malformed-block check.
fn parse_input(input_json: &str) -> Value {
    if input_json.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(input_json).unwrap_or(Value::Null)
}

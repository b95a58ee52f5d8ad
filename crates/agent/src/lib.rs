//! The Windlass agent loop.
//!
//! One [`LoopController`] per request: it is handed an `LlmGateway`, a
//! `ToolRegistry`, and a prior transcript, drives bounded iterations of
//! LLM call + sequential tool execution, and returns the final text plus
//! the [`windlass_core::RunMetadata`] trace. Streaming callers also get a
//! live sequence of [`StreamEvent`]s on a channel.
//!
//! The loop holds no state across turns and no process-wide singletons;
//! everything it needs arrives by injection.

pub mod assembler;
pub mod controller;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use assembler::{AssemblerSignal, TurnAssembler};
pub use controller::{LoopController, RunOutcome};
pub use stream_event::{sse_end_frame, sse_frame, StreamEvent, END_OF_STREAM};

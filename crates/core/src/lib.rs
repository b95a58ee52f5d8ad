//! # Windlass Core
//!
//! Domain types, traits, and error definitions for the Windlass tool-
//! orchestration loop. Every collaborator is defined as a trait here;
//! implementations live in their respective crates and depend inward on
//! this one. Swapping the LLM gateway or testing against a scripted stub
//! never touches the loop itself.

pub mod error;
pub mod gateway;
pub mod message;
pub mod run;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, GatewayError, Result, ToolError};
pub use gateway::{
    BlockDelta, BlockStart, GatewayEvent, GatewayRequest, GatewayResponse, LlmGateway, StopReason,
    ToolDefinition, Usage,
};
pub use message::{ContentBlock, Role, Turn};
pub use run::{RunMetadata, ToolInteraction};
pub use tool::{Tool, ToolOutput, ToolRegistry};

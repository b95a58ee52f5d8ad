//! Built-in tools for the Windlass agent loop.
//!
//! Every tool follows the same contract: validate your own input and
//! report problems as a `ToolOutput` with `is_error = true` and an
//! `"error"` key in the payload. The loop feeds error payloads back to the
//! model; nothing here ever raises for bad input.

pub mod calculator;
pub mod clock;
pub mod web_search;

pub use calculator::CalculatorTool;
pub use clock::ClockTool;
pub use web_search::WebSearchTool;

use windlass_core::tool::ToolRegistry;

/// A registry pre-loaded with every built-in tool.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(CalculatorTool));
    registry.register(Box::new(ClockTool));
    registry.register(Box::new(WebSearchTool));
    registry
}

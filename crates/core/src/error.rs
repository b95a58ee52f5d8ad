//! Error types for the Windlass domain.
//!
//! Uses `thiserror` for ergonomic error definitions. The taxonomy mirrors
//! the propagation policy: tool-internal problems never appear here at all
//! (they travel as `ToolOutput` payloads with `is_error = true`), while
//! everything below is a contract violation that propagates to the caller
//! unmodified.

use thiserror::Error;

/// The top-level error type for all Windlass operations. Only the two
/// bounded contexts that can actually fail a run appear here; config has
/// its own error type in its own crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Errors from the LLM gateway. All of these are fatal to the run that
/// observed them; none is retried by the loop.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    /// The provider sent a `stop_reason` outside the closed set. This
    /// signals an incompatible provider contract, not a transient fault.
    #[error("Illegal stop_reason from provider: '{0}'")]
    IllegalStopReason(String),

    /// A tool_use block arrived without an id, a name, or an input object.
    #[error("Malformed tool_use block: {0}")]
    MalformedToolUse(String),

    /// `stop_reason` claimed tool_use but the turn carried no content.
    #[error("stop_reason was tool_use but the response contained no tool_use blocks")]
    NoToolUseBlocks,
}

/// Tool dispatch errors. A tool's own validation or execution failures are
/// *not* errors — they come back as `ToolOutput { is_error: true }`. The
/// only failure the registry itself can produce is an unknown name, which
/// is a configuration defect.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),
}

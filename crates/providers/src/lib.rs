//! LLM gateway implementations for Windlass.
//!
//! All gateways implement the `windlass_core::LlmGateway` trait. The loop
//! controller receives one by injection and never knows which backend is
//! behind it.

pub mod anthropic;

pub use anthropic::AnthropicGateway;

//! Configuration loading, validation, and management for Windlass.
//!
//! Loads configuration from `~/.windlass/config.toml` with environment
//! variable overrides. Validates all settings at startup. The loop itself
//! holds no global state — this config is handed to whoever constructs a
//! loop controller, per request.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// The root configuration structure.
///
/// Maps directly to `~/.windlass/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Provider API key. Overridable via `WINDLASS_API_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Provider base URL (useful for proxies and tests).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Default model.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature.
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response.
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Loop runtime limits.
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            runtime: RuntimeConfig::default(),
        }
    }
}

// Secrets never appear in Debug output.
impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("runtime", &self.runtime)
            .finish()
    }
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

/// Loop runtime limits.
///
/// The two iteration caps are intentionally separate knobs: the streaming
/// and non-streaming paths are tuned independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Iteration cap for the non-streaming loop.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Iteration cap for the streaming loop.
    #[serde(default = "default_max_stream_iterations")]
    pub max_stream_iterations: u32,

    /// Provider request timeout in seconds. There is no additional
    /// wall-clock timer inside the loop; the iteration cap is the circuit
    /// breaker against runaway runs.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_max_stream_iterations() -> u32 {
    8
}
fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_stream_iterations: default_max_stream_iterations(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, then apply env overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Load from `~/.windlass/config.toml`, falling back to defaults (plus
    /// env overrides) when the file does not exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = std::env::home_dir()
            .unwrap_or_else(|| Path::new(".").to_path_buf())
            .join(".windlass")
            .join("config.toml");

        if path.exists() {
            Self::load(&path)
        } else {
            let mut config = AppConfig::default();
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("WINDLASS_API_KEY") {
            if !key.is_empty() {
                self.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("WINDLASS_BASE_URL") {
            if !url.is_empty() {
                self.base_url = Some(url);
            }
        }
        if let Ok(model) = std::env::var("WINDLASS_MODEL") {
            if !model.is_empty() {
                self.default_model = model;
            }
        }
    }

    /// Validate settings at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::Invalid(format!(
                "default_temperature must be in [0.0, 2.0], got {}",
                self.default_temperature
            )));
        }
        if self.default_max_tokens == 0 {
            return Err(ConfigError::Invalid(
                "default_max_tokens must be at least 1".into(),
            ));
        }
        if self.runtime.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "runtime.max_iterations must be at least 1".into(),
            ));
        }
        if self.runtime.max_stream_iterations == 0 {
            return Err(ConfigError::Invalid(
                "runtime.max_stream_iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

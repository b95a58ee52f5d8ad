//! Clock tool — reports the current UTC time.

use async_trait::async_trait;
use chrono::Utc;

use windlass_core::tool::{Tool, ToolOutput};

pub struct ClockTool;

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "clock"
    }

    fn description(&self) -> &str {
        "Get the current date and time in UTC. Optionally accepts a strftime format string."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "format": {
                    "type": "string",
                    "description": "Optional strftime format, e.g. '%Y-%m-%d'. Defaults to RFC 3339."
                }
            }
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolOutput {
        let now = Utc::now();

        match input.get("format").and_then(|v| v.as_str()) {
            None => ToolOutput::ok(serde_json::json!({
                "utc": now.to_rfc3339(),
            })),
            Some(format) => {
                // Unknown specifiers surface as fmt errors from chrono's
                // delayed formatter.
                let mut rendered = String::new();
                match std::fmt::write(
                    &mut rendered,
                    format_args!("{}", now.format(format)),
                ) {
                    Ok(()) => ToolOutput::ok(serde_json::json!({
                        "utc": rendered,
                        "format": format,
                    })),
                    Err(_) => {
                        ToolOutput::invalid(format!("Invalid time format string: '{format}'"))
                    }
                }
            }
        }
    }
}

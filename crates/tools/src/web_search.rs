//! Web search tool — stub that returns mock search results.
//!
//! In production this would call a real search API (Brave, Google, etc.).
//! The stub returns plausible results so the loop can be exercised
//! end-to-end without network access.

use async_trait::async_trait;
use serde::Serialize;

use windlass_core::tool::{Tool, ToolOutput};

pub struct WebSearchTool;

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for information. Returns a list of relevant results with titles, URLs, and snippets."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "num_results": {
                    "type": "integer",
                    "description": "Number of results to return (default 3)",
                    "default": 3
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolOutput {
        let Some(query) = input["query"].as_str() else {
            return ToolOutput::invalid("Missing 'query' argument");
        };
        if query.trim().is_empty() {
            return ToolOutput::invalid("Query must not be empty");
        }

        let num_results = input["num_results"].as_u64().unwrap_or(3).min(5) as usize;

        let results = generate_mock_results(query, num_results);
        match serde_json::to_value(&results) {
            Ok(value) => ToolOutput::ok(serde_json::json!({
                "query": query,
                "results": value,
            })),
            Err(e) => ToolOutput::invalid(format!("Failed to serialize results: {e}")),
        }
    }
}

#[derive(Serialize, Clone)]
struct SearchResult {
    title: String,
    url: String,
    snippet: String,
}

fn generate_mock_results(query: &str, count: usize) -> Vec<SearchResult> {
    let q = query.to_lowercase();

    // Context-aware mock results for common topics.
    let templates: Vec<(&str, Vec<SearchResult>)> = vec![
        ("rust", vec![
            SearchResult {
                title: "The Rust Programming Language".into(),
                url: "https://doc.rust-lang.org/book/".into(),
                snippet: "Rust is a systems programming language focused on safety, speed, and concurrency.".into(),
            },
            SearchResult {
                title: "Rust by Example".into(),
                url: "https://doc.rust-lang.org/rust-by-example/".into(),
                snippet: "A collection of runnable examples that illustrate Rust concepts and standard library usage.".into(),
            },
            SearchResult {
                title: "crates.io: Rust Package Registry".into(),
                url: "https://crates.io/".into(),
                snippet: "The Rust community's crate registry for sharing and discovering Rust libraries.".into(),
            },
        ]),
        ("weather", vec![
            SearchResult {
                title: "Weather Forecast - National Weather Service".into(),
                url: "https://weather.gov/".into(),
                snippet: "Current conditions and forecasts for locations across the United States.".into(),
            },
            SearchResult {
                title: "OpenWeatherMap".into(),
                url: "https://openweathermap.org/".into(),
                snippet: "Free weather API providing current weather data and forecasts for any location.".into(),
            },
        ]),
    ];

    for (keyword, results) in &templates {
        if q.contains(keyword) {
            return results.iter().take(count).cloned().collect();
        }
    }

    // Generic fallback.
    (0..count)
        .map(|i| SearchResult {
            title: format!("Result {} for: {}", i + 1, query),
            url: format!(
                "https://example.com/search?q={}&p={}",
                query.replace(' ', "+"),
                i + 1
            ),
            snippet: format!(
                "This is a mock search result for the query '{query}'. In production, this would contain real content."
            ),
        })
        .collect()
}

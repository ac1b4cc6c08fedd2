//! Vision model client.
//!
//! Serializes one (screenshot, ARIA snapshot, history, task) tuple per cycle
//! to the Anthropic Messages API and parses a single tool-use action back.

use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::agent::budget::TokenUsage;
use crate::agent::prompt::{action_tools, SYSTEM_PROMPT};
use crate::error::{Result, StudioError};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct FrameRequest<'a> {
    pub frame_base64: &'a str,
    pub aria_snapshot: &'a str,
    pub history: &'a str,
    pub task: &'a str,
}

/// The model's decision for one cycle.
#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    pub action_name: String,
    pub action_input: Value,
    pub reasoning: Option<String>,
    pub usage: TokenUsage,
}

pub struct VisionClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl VisionClient {
    /// Build a client using `ANTHROPIC_API_KEY` from the environment.
    pub fn from_env(model: &str, timeout: Duration) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| StudioError::Vision("ANTHROPIC_API_KEY is not set".to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StudioError::Vision(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key,
            model: model.to_string(),
            max_tokens: 1024,
        })
    }

    pub async fn analyze_frame(&self, request: FrameRequest<'_>) -> Result<FrameAnalysis> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": SYSTEM_PROMPT,
            "tools": action_tools(),
            "tool_choice": { "type": "any" },
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": "image/jpeg",
                            "data": request.frame_base64,
                        }
                    },
                    {
                        "type": "text",
                        "text": build_user_text(request.task, request.history, request.aria_snapshot),
                    }
                ]
            }]
        });

        let response = self
            .http
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| StudioError::Vision(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<response unavailable>".to_string());
            return Err(StudioError::Vision(format!(
                "API returned {}: {}",
                status, text
            )));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| StudioError::Vision(format!("invalid response: {}", e)))?;

        Ok(analysis_from_response(parsed))
    }
}

fn build_user_text(task: &str, history: &str, aria_snapshot: &str) -> String {
    let mut text = format!("## Task\n{}\n", task);
    if !history.is_empty() {
        text.push_str(&format!("\n## Previous Actions\n{}\n", history));
    }
    text.push_str(&format!(
        "\n## Current Page ARIA Snapshot\n```\n{}\n```\n\nDecide the single next action and respond with exactly one tool call.",
        aria_snapshot
    ));
    text
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// First tool-use block wins; any text before it becomes the reasoning. A
/// reply with no tool use is folded into a synthetic `fail` action.
fn analysis_from_response(response: MessagesResponse) -> FrameAnalysis {
    let usage = TokenUsage {
        input: response.usage.input_tokens,
        output: response.usage.output_tokens,
    };

    let mut reasoning_parts = Vec::new();
    for block in response.content {
        match block.block_type.as_str() {
            "tool_use" => {
                let reasoning = if reasoning_parts.is_empty() {
                    None
                } else {
                    Some(reasoning_parts.join("\n"))
                };
                return FrameAnalysis {
                    action_name: block.name.unwrap_or_default(),
                    action_input: block.input.unwrap_or(Value::Null),
                    reasoning,
                    usage,
                };
            }
            "text" => {
                if let Some(text) = block.text {
                    reasoning_parts.push(text);
                }
            }
            _ => {}
        }
    }

    let text = reasoning_parts.join("\n");
    let reason = if text.is_empty() {
        "Model returned no action".to_string()
    } else {
        text.clone()
    };
    FrameAnalysis {
        action_name: "fail".to_string(),
        action_input: json!({ "reason": reason }),
        reasoning: if text.is_empty() { None } else { Some(text) },
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(value: Value) -> MessagesResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_tool_use_with_reasoning() {
        let analysis = analysis_from_response(response(json!({
            "content": [
                { "type": "text", "text": "The search box is e3." },
                { "type": "tool_use", "id": "t1", "name": "click", "input": { "ref": "e3" } }
            ],
            "usage": { "input_tokens": 1200, "output_tokens": 80 }
        })));

        assert_eq!(analysis.action_name, "click");
        assert_eq!(analysis.action_input, json!({ "ref": "e3" }));
        assert_eq!(analysis.reasoning.as_deref(), Some("The search box is e3."));
        assert_eq!(analysis.usage.input, 1200);
        assert_eq!(analysis.usage.output, 80);
    }

    #[test]
    fn test_first_tool_use_wins() {
        let analysis = analysis_from_response(response(json!({
            "content": [
                { "type": "tool_use", "id": "t1", "name": "scroll", "input": { "direction": "down" } },
                { "type": "tool_use", "id": "t2", "name": "click", "input": { "ref": "e1" } }
            ]
        })));
        assert_eq!(analysis.action_name, "scroll");
    }

    #[test]
    fn test_no_tool_use_becomes_fail() {
        let analysis = analysis_from_response(response(json!({
            "content": [{ "type": "text", "text": "I cannot see the page." }],
            "usage": { "input_tokens": 10, "output_tokens": 5 }
        })));

        assert_eq!(analysis.action_name, "fail");
        assert_eq!(
            analysis.action_input,
            json!({ "reason": "I cannot see the page." })
        );
        assert_eq!(analysis.reasoning.as_deref(), Some("I cannot see the page."));
    }

    #[test]
    fn test_empty_response_becomes_default_fail() {
        let analysis = analysis_from_response(response(json!({ "content": [] })));
        assert_eq!(analysis.action_name, "fail");
        assert_eq!(
            analysis.action_input,
            json!({ "reason": "Model returned no action" })
        );
        assert!(analysis.reasoning.is_none());
    }

    #[test]
    fn test_user_text_layout() {
        let text = build_user_text("find the price", "1. navigate → OK", "- button [ref=e1]");
        assert!(text.starts_with("## Task\nfind the price\n"));
        assert!(text.contains("\n## Previous Actions\n1. navigate → OK\n"));
        assert!(text.contains("\n## Current Page ARIA Snapshot\n```\n- button [ref=e1]\n```\n"));

        let no_history = build_user_text("task", "", "snap");
        assert!(!no_history.contains("Previous Actions"));
    }
}

//! Cycle history compression for the model prompt.
//!
//! The full cycle log would blow the prompt up; older entries collapse into
//! a one-line tally and only the most recent ones keep their detail.

use serde_json::Value;

use crate::agent::audit::CycleEntry;

pub const DEFAULT_MAX_DETAILED: usize = 10;

/// Collapse a cycle log into a short prompt block: an optional summary line
/// for older entries followed by one line per recent entry.
pub fn compress_history(entries: &[CycleEntry], max_detailed: usize) -> String {
    if entries.is_empty() {
        return String::new();
    }

    let mut lines = Vec::new();
    let detailed_start = entries.len().saturating_sub(max_detailed);

    if detailed_start > 0 {
        let earlier = &entries[..detailed_start];
        let succeeded = earlier.iter().filter(|e| e.success).count();
        lines.push(format!(
            "[{} earlier actions: {} succeeded, {} failed]",
            earlier.len(),
            succeeded,
            earlier.len() - succeeded
        ));
    }

    for entry in &entries[detailed_start..] {
        let status = if entry.success {
            "OK".to_string()
        } else {
            format!(
                "FAILED: {}",
                entry.error.as_deref().unwrap_or("unknown error")
            )
        };
        lines.push(format!(
            "{}. {} → {}",
            entry.cycle + 1,
            format_action(&entry.action_name, &entry.action_input),
            status
        ));
    }

    lines.join("\n")
}

/// Kind-specific one-phrase rendering of an action, with a JSON fallback
/// for anything outside the vocabulary.
pub fn format_action(name: &str, input: &Value) -> String {
    let reference = input.get("ref").and_then(Value::as_str);
    let coords = match (
        input.get("x").and_then(Value::as_f64),
        input.get("y").and_then(Value::as_f64),
    ) {
        (Some(x), Some(y)) => Some((x, y)),
        _ => None,
    };

    match name {
        "click" | "hover" => match (reference, coords) {
            (Some(r), _) => format!("{} [{}]", name, r),
            (None, Some((x, y))) => format!("{} ({}, {})", name, x, y),
            _ => format!("{} (no target)", name),
        },
        "type" => {
            let text = input.get("text").and_then(Value::as_str).unwrap_or("");
            let shown = truncate_text(text, 20);
            match reference {
                Some(r) => format!("type \"{}\" into [{}]", shown, r),
                None => format!("type \"{}\"", shown),
            }
        }
        "scroll" => {
            let direction = input
                .get("direction")
                .and_then(Value::as_str)
                .unwrap_or("down");
            format!("scroll {}", direction)
        }
        "navigate" => {
            let url = input.get("url").and_then(Value::as_str).unwrap_or("?");
            format!("navigate to {}", url)
        }
        "keyboard" => {
            let key = input.get("key").and_then(Value::as_str).unwrap_or("?");
            format!("press {}", key)
        }
        "wait" => {
            let ms = input.get("ms").and_then(Value::as_u64).unwrap_or(1000);
            format!("wait {}ms", ms)
        }
        "select" => {
            let value = input.get("value").and_then(Value::as_str).unwrap_or("?");
            match reference {
                Some(r) => format!("select \"{}\" in [{}]", value, r),
                None => format!("select \"{}\"", value),
            }
        }
        "done" => "done".to_string(),
        "fail" => "fail".to_string(),
        other => format!("{} {}", other, input),
    }
}

fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(cycle: usize, name: &str, input: Value, success: bool) -> CycleEntry {
        CycleEntry {
            cycle,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            page_url: "http://localhost/".to_string(),
            frame_path: None,
            action_name: name.to_string(),
            action_input: input,
            reasoning: None,
            success,
            error: if success {
                None
            } else {
                Some("element not found".to_string())
            },
            tokens: None,
            duration_ms: 10,
        }
    }

    #[test]
    fn test_empty_history() {
        assert_eq!(compress_history(&[], DEFAULT_MAX_DETAILED), "");
    }

    #[test]
    fn test_few_entries_one_line_each() {
        let entries = vec![
            entry(0, "navigate", json!({"url": "http://localhost/"}), true),
            entry(1, "click", json!({"ref": "e5"}), false),
        ];
        let history = compress_history(&entries, DEFAULT_MAX_DETAILED);
        let lines: Vec<&str> = history.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "1. navigate to http://localhost/ → OK");
        assert_eq!(lines[1], "2. click [e5] → FAILED: element not found");
    }

    #[test]
    fn test_overflow_gets_summary_line() {
        let entries: Vec<CycleEntry> = (0..15)
            .map(|i| entry(i, "click", json!({"ref": "e1"}), i % 2 == 0))
            .collect();
        let history = compress_history(&entries, 10);
        let lines: Vec<&str> = history.lines().collect();
        assert_eq!(lines.len(), 11);
        assert_eq!(lines[0], "[5 earlier actions: 3 succeeded, 2 failed]");
    }

    #[test]
    fn test_text_truncated_to_twenty_chars() {
        let formatted = format_action(
            "type",
            &json!({"text": "a very long piece of typed text", "ref": "e2"}),
        );
        assert_eq!(formatted, "type \"a very long piece of...\" into [e2]");
    }

    #[test]
    fn test_coordinate_click_variant() {
        assert_eq!(
            format_action("click", &json!({"x": 10.0, "y": 20.0})),
            "click (10, 20)"
        );
    }

    #[test]
    fn test_unknown_kind_json_fallback() {
        let formatted = format_action("error", &json!({"message": "boom"}));
        assert!(formatted.starts_with("error "));
        assert!(formatted.contains("boom"));
    }
}

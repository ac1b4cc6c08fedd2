//! Action safety policy.
//!
//! Consulted between the model's decision and executor dispatch. Two gates:
//! read-only mode restricts the vocabulary to non-mutating actions, and
//! blocked URL patterns veto navigations.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, StudioError};

const READ_ONLY_ALLOWED: &[&str] = &["scroll", "navigate", "wait", "done", "fail", "hover"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SafetyConfig {
    pub read_only_mode: bool,
    pub blocked_url_patterns: Vec<String>,
}

pub struct SafetyPolicy {
    read_only: bool,
    blocked: Vec<Regex>,
}

impl SafetyPolicy {
    pub fn new(config: &SafetyConfig) -> Result<Self> {
        let blocked = config
            .blocked_url_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    StudioError::Other(format!("invalid blocked URL pattern '{}': {}", pattern, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            read_only: config.read_only_mode,
            blocked,
        })
    }

    /// Returns the denial reason when the action is not permitted.
    pub fn check(&self, name: &str, input: &Value) -> std::result::Result<(), String> {
        if self.read_only && !READ_ONLY_ALLOWED.contains(&name) {
            return Err(format!("action '{}' is not allowed in read-only mode", name));
        }

        if name == "navigate" {
            let url = input.get("url").and_then(Value::as_str).unwrap_or("");
            for pattern in &self.blocked {
                if pattern.is_match(url) {
                    return Err(format!(
                        "URL {} blocked by pattern: {}",
                        url,
                        pattern.as_str()
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_permissive_by_default() {
        let policy = SafetyPolicy::new(&SafetyConfig::default()).unwrap();
        assert!(policy.check("click", &json!({"ref": "e1"})).is_ok());
        assert!(policy
            .check("navigate", &json!({"url": "https://example.com"}))
            .is_ok());
    }

    #[test]
    fn test_read_only_mode() {
        let policy = SafetyPolicy::new(&SafetyConfig {
            read_only_mode: true,
            blocked_url_patterns: Vec::new(),
        })
        .unwrap();

        for allowed in ["scroll", "navigate", "wait", "done", "fail", "hover"] {
            assert!(policy.check(allowed, &json!({})).is_ok(), "{}", allowed);
        }
        for denied in ["click", "type", "keyboard", "select"] {
            assert!(policy.check(denied, &json!({})).is_err(), "{}", denied);
        }
    }

    #[test]
    fn test_blocked_url_pattern() {
        let policy = SafetyPolicy::new(&SafetyConfig {
            read_only_mode: false,
            blocked_url_patterns: vec![r"bank\.com".to_string()],
        })
        .unwrap();

        let reason = policy
            .check("navigate", &json!({"url": "https://bank.com/login"}))
            .unwrap_err();
        assert!(reason.contains("blocked by pattern"));
        assert!(reason.contains("bank"));

        assert!(policy
            .check("navigate", &json!({"url": "https://example.com"}))
            .is_ok());
        // Patterns only gate navigation.
        assert!(policy.check("click", &json!({"ref": "e1"})).is_ok());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let result = SafetyPolicy::new(&SafetyConfig {
            read_only_mode: false,
            blocked_url_patterns: vec!["(unclosed".to_string()],
        });
        assert!(result.is_err());
    }
}

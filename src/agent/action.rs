//! Agent action vocabulary.
//!
//! The model emits one tool call per cycle; the tool name and input map are
//! parsed into a closed tagged sum here. `done` and `fail` are terminal and
//! handled by the loop, everything else is dispatched to the executor.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

impl MouseButton {
    pub fn as_cdp(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Middle => "middle",
            MouseButton::Right => "right",
        }
    }

    fn parse(input: &Value) -> MouseButton {
        match input.get("button").and_then(Value::as_str) {
            Some("middle") => MouseButton::Middle,
            Some("right") => MouseButton::Right,
            _ => MouseButton::Left,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    /// Signed (dx, dy) wheel deltas: down/right positive, up/left negative.
    pub fn deltas(&self, amount: f64) -> (f64, f64) {
        match self {
            ScrollDirection::Up => (0.0, -amount),
            ScrollDirection::Down => (0.0, amount),
            ScrollDirection::Left => (-amount, 0.0),
            ScrollDirection::Right => (amount, 0.0),
        }
    }
}

/// Where a pointer action lands: an accessibility ref or raw coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum PointerTarget {
    Ref(String),
    Coords { x: f64, y: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentAction {
    Click {
        target: PointerTarget,
        button: MouseButton,
    },
    Type {
        reference: Option<String>,
        text: String,
        clear_first: bool,
    },
    Scroll {
        direction: ScrollDirection,
        amount: f64,
    },
    Navigate {
        url: String,
    },
    Keyboard {
        key: String,
    },
    Wait {
        ms: u64,
    },
    Hover {
        target: PointerTarget,
    },
    Select {
        reference: String,
        value: String,
    },
    Done {
        success: bool,
        summary: String,
        extracted_data: Option<Value>,
    },
    Fail {
        reason: String,
    },
}

impl AgentAction {
    pub fn is_terminal(name: &str) -> bool {
        matches!(name, "done" | "fail")
    }

    /// Parse a tool call into the closed action vocabulary. Unknown kinds
    /// and missing required arguments are reported as plain strings that
    /// become the executor's error message.
    pub fn parse(name: &str, input: &Value) -> Result<AgentAction, String> {
        match name {
            "click" => Ok(AgentAction::Click {
                target: pointer_target(input, "click")?,
                button: MouseButton::parse(input),
            }),
            "type" => {
                let text = require_str(input, "text", "type")?;
                Ok(AgentAction::Type {
                    reference: opt_str(input, "ref"),
                    text,
                    clear_first: input
                        .get("clear_first")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                })
            }
            "scroll" => {
                let direction = match input.get("direction").and_then(Value::as_str) {
                    Some("up") => ScrollDirection::Up,
                    Some("down") => ScrollDirection::Down,
                    Some("left") => ScrollDirection::Left,
                    Some("right") => ScrollDirection::Right,
                    _ => {
                        return Err(
                            "scroll requires direction (up, down, left, right)".to_string()
                        )
                    }
                };
                let amount = input
                    .get("amount")
                    .and_then(Value::as_f64)
                    .unwrap_or(300.0);
                Ok(AgentAction::Scroll { direction, amount })
            }
            "navigate" => Ok(AgentAction::Navigate {
                url: require_str(input, "url", "navigate")?,
            }),
            "keyboard" => Ok(AgentAction::Keyboard {
                key: require_str(input, "key", "keyboard")?,
            }),
            "wait" => Ok(AgentAction::Wait {
                ms: input.get("ms").and_then(Value::as_u64).unwrap_or(1000),
            }),
            "hover" => Ok(AgentAction::Hover {
                target: pointer_target(input, "hover")?,
            }),
            "select" => Ok(AgentAction::Select {
                reference: require_str(input, "ref", "select")?,
                value: require_str(input, "value", "select")?,
            }),
            "done" => Ok(AgentAction::Done {
                success: input
                    .get("success")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
                summary: opt_str(input, "summary").unwrap_or_default(),
                extracted_data: input.get("extracted_data").cloned(),
            }),
            "fail" => Ok(AgentAction::Fail {
                reason: opt_str(input, "reason")
                    .unwrap_or_else(|| "No reason given".to_string()),
            }),
            other => Err(format!("Unknown action: {}", other)),
        }
    }
}

fn pointer_target(input: &Value, kind: &str) -> Result<PointerTarget, String> {
    if let Some(reference) = opt_str(input, "ref") {
        return Ok(PointerTarget::Ref(reference));
    }
    let x = input.get("x").and_then(Value::as_f64);
    let y = input.get("y").and_then(Value::as_f64);
    match (x, y) {
        (Some(x), Some(y)) => Ok(PointerTarget::Coords { x, y }),
        _ => Err(format!("{} requires ref or x,y", kind)),
    }
}

fn opt_str(input: &Value, key: &str) -> Option<String> {
    input.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn require_str(input: &Value, key: &str, kind: &str) -> Result<String, String> {
    opt_str(input, key).ok_or_else(|| format!("{} requires {}", kind, key))
}

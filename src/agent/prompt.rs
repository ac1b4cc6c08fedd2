//! Fixed system prompt and tool schemas for the vision model.

use serde_json::{json, Value};

pub const SYSTEM_PROMPT: &str = r#"You are a browser automation agent. Each turn you receive a screenshot of the current page, an ARIA snapshot of its accessibility tree, a summary of your previous actions, and the task to accomplish.

The ARIA snapshot marks interactable elements with [ref=eN] markers. Prefer targeting elements by their ref; fall back to screenshot coordinates only when no ref fits.

Respond with exactly one tool call per turn:
- click: click an element by ref, or at x,y coordinates
- type: type text, optionally into a ref, optionally clearing the field first
- scroll: scroll the page up, down, left, or right
- navigate: go to a URL
- keyboard: press a key or combo such as Enter or Control+a
- wait: pause for a number of milliseconds
- hover: move the pointer over an element or coordinates
- select: choose an option of a select element by value or label
- done: the task is complete; include a summary and any extracted data
- fail: the task cannot be completed; include the reason

Work in small steps and re-read the page after each action. If an action keeps failing, try a different approach instead of repeating it. When the task is finished, call done instead of taking more actions."#;

/// Tool declarations for the ten agent actions. The model is constrained to
/// pick one of these every cycle.
pub fn action_tools() -> Vec<Value> {
    vec![
        json!({
            "name": "click",
            "description": "Click an element by accessibility ref, or at viewport coordinates",
            "input_schema": {
                "type": "object",
                "properties": {
                    "ref": { "type": "string", "description": "Accessibility ref, e.g. e5" },
                    "x": { "type": "number" },
                    "y": { "type": "number" },
                    "button": { "type": "string", "enum": ["left", "middle", "right"] }
                }
            }
        }),
        json!({
            "name": "type",
            "description": "Type text, optionally into the element identified by ref",
            "input_schema": {
                "type": "object",
                "properties": {
                    "text": { "type": "string" },
                    "ref": { "type": "string" },
                    "clear_first": { "type": "boolean", "description": "Clear the field before typing" }
                },
                "required": ["text"]
            }
        }),
        json!({
            "name": "scroll",
            "description": "Scroll the page",
            "input_schema": {
                "type": "object",
                "properties": {
                    "direction": { "type": "string", "enum": ["up", "down", "left", "right"] },
                    "amount": { "type": "number", "description": "Scroll distance in pixels, default 300" }
                },
                "required": ["direction"]
            }
        }),
        json!({
            "name": "navigate",
            "description": "Navigate the page to a URL",
            "input_schema": {
                "type": "object",
                "properties": { "url": { "type": "string" } },
                "required": ["url"]
            }
        }),
        json!({
            "name": "keyboard",
            "description": "Press a key or key combo, e.g. Enter or Control+a",
            "input_schema": {
                "type": "object",
                "properties": { "key": { "type": "string" } },
                "required": ["key"]
            }
        }),
        json!({
            "name": "wait",
            "description": "Wait before the next observation",
            "input_schema": {
                "type": "object",
                "properties": { "ms": { "type": "integer", "description": "Milliseconds, default 1000" } }
            }
        }),
        json!({
            "name": "hover",
            "description": "Hover over an element by ref, or at viewport coordinates",
            "input_schema": {
                "type": "object",
                "properties": {
                    "ref": { "type": "string" },
                    "x": { "type": "number" },
                    "y": { "type": "number" }
                }
            }
        }),
        json!({
            "name": "select",
            "description": "Select an option of a select element by value or visible label",
            "input_schema": {
                "type": "object",
                "properties": {
                    "ref": { "type": "string" },
                    "value": { "type": "string" }
                },
                "required": ["ref", "value"]
            }
        }),
        json!({
            "name": "done",
            "description": "The task is complete",
            "input_schema": {
                "type": "object",
                "properties": {
                    "success": { "type": "boolean" },
                    "summary": { "type": "string" },
                    "extracted_data": { "type": "object", "description": "Any data the task asked to extract" }
                },
                "required": ["success", "summary"]
            }
        }),
        json!({
            "name": "fail",
            "description": "The task cannot be completed",
            "input_schema": {
                "type": "object",
                "properties": { "reason": { "type": "string" } },
                "required": ["reason"]
            }
        }),
    ]
}

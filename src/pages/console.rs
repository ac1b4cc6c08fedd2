//! Per-page console sink.
//!
//! Each registered page gets one background task that subscribes to the CDP
//! Runtime domain and appends console API calls and runtime exceptions to the
//! page's log vector for the lifetime of the page.

use chromiumoxide::cdp::js_protocol::runtime::{
    ConsoleApiCalledType, EnableParams, EventConsoleApiCalled, EventExceptionThrown, RemoteObject,
    RemoteObjectType,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// Console message severity. Exceptions are recorded as `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Log,
    Warn,
    Error,
    Info,
    Debug,
    Trace,
}

/// One console message or runtime exception, in page insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleLogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
}

/// Map a CDP console API call type onto a log level.
pub fn level_for(call_type: &ConsoleApiCalledType) -> LogLevel {
    match call_type {
        ConsoleApiCalledType::Warning => LogLevel::Warn,
        ConsoleApiCalledType::Error => LogLevel::Error,
        ConsoleApiCalledType::Info => LogLevel::Info,
        ConsoleApiCalledType::Debug => LogLevel::Debug,
        ConsoleApiCalledType::Trace => LogLevel::Trace,
        _ => LogLevel::Log,
    }
}

/// Render a remote object the way DevTools would show it in the console:
/// plain value first, then the object description, then the preview, and as
/// a last resort the type name.
pub fn stringify_remote_object(obj: &RemoteObject) -> String {
    if let Some(value) = &obj.value {
        return match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
    }
    if let Some(description) = &obj.description {
        return description.clone();
    }
    if let Some(preview) = &obj.preview {
        if let Some(description) = &preview.description {
            return description.clone();
        }
    }
    type_name(&obj.r#type).to_string()
}

fn type_name(t: &RemoteObjectType) -> &'static str {
    match t {
        RemoteObjectType::Object => "object",
        RemoteObjectType::Function => "function",
        RemoteObjectType::Undefined => "undefined",
        RemoteObjectType::String => "string",
        RemoteObjectType::Number => "number",
        RemoteObjectType::Boolean => "boolean",
        RemoteObjectType::Symbol => "symbol",
        RemoteObjectType::Bigint => "bigint",
    }
}

fn entry_from_console_event(event: &EventConsoleApiCalled) -> ConsoleLogEntry {
    let text = event
        .args
        .iter()
        .map(stringify_remote_object)
        .collect::<Vec<_>>()
        .join(" ");

    let frame = event
        .stack_trace
        .as_ref()
        .and_then(|trace| trace.call_frames.first());

    ConsoleLogEntry {
        timestamp: chrono::Utc::now().to_rfc3339(),
        level: level_for(&event.r#type),
        text,
        url: frame.map(|f| f.url.clone()),
        line: frame.map(|f| f.line_number),
        column: frame.map(|f| f.column_number),
    }
}

fn entry_from_exception_event(event: &EventExceptionThrown) -> ConsoleLogEntry {
    let details = &event.exception_details;
    let text = details
        .exception
        .as_ref()
        .and_then(|ex| ex.description.clone())
        .unwrap_or_else(|| details.text.clone());

    ConsoleLogEntry {
        timestamp: chrono::Utc::now().to_rfc3339(),
        level: LogLevel::Error,
        text,
        url: details.url.clone(),
        line: Some(details.line_number),
        column: Some(details.column_number),
    }
}

/// Subscribe to the page's console and exception streams for the lifetime of
/// the page. When the streams end (the target is gone) the page name is sent
/// on `closed_tx` so the registry can tear the entry down.
pub fn spawn_console_capture(
    page: Page,
    name: String,
    logs: Arc<Mutex<Vec<ConsoleLogEntry>>>,
    closed_tx: UnboundedSender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut console_events = match page.event_listener::<EventConsoleApiCalled>().await {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("console capture unavailable for '{}': {}", name, e);
                return;
            }
        };
        let mut exception_events = match page.event_listener::<EventExceptionThrown>().await {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("exception capture unavailable for '{}': {}", name, e);
                return;
            }
        };

        if let Err(e) = page.execute(EnableParams::default()).await {
            log::warn!("Runtime.enable failed for '{}': {}", name, e);
        }

        loop {
            tokio::select! {
                event = console_events.next() => match event {
                    Some(event) => {
                        if let Ok(mut logs) = logs.lock() {
                            logs.push(entry_from_console_event(&event));
                        }
                    }
                    None => break,
                },
                event = exception_events.next() => match event {
                    Some(event) => {
                        if let Ok(mut logs) = logs.lock() {
                            logs.push(entry_from_exception_event(&event));
                        }
                    }
                    None => break,
                },
            }
        }

        log::debug!("console stream ended for page '{}'", name);
        let _ = closed_tx.send(name);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn remote_object(value: serde_json::Value) -> RemoteObject {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(level_for(&ConsoleApiCalledType::Warning), LogLevel::Warn);
        assert_eq!(level_for(&ConsoleApiCalledType::Error), LogLevel::Error);
        assert_eq!(level_for(&ConsoleApiCalledType::Info), LogLevel::Info);
        assert_eq!(level_for(&ConsoleApiCalledType::Debug), LogLevel::Debug);
        assert_eq!(level_for(&ConsoleApiCalledType::Trace), LogLevel::Trace);
        // Anything else is a plain log line.
        assert_eq!(level_for(&ConsoleApiCalledType::Table), LogLevel::Log);
        assert_eq!(level_for(&ConsoleApiCalledType::Dir), LogLevel::Log);
    }

    #[test]
    fn test_stringify_prefers_value() {
        let obj = remote_object(json!({"type": "string", "value": "hello"}));
        assert_eq!(stringify_remote_object(&obj), "hello");

        let obj = remote_object(json!({"type": "number", "value": 42}));
        assert_eq!(stringify_remote_object(&obj), "42");
    }

    #[test]
    fn test_stringify_falls_back_to_description() {
        let obj = remote_object(json!({
            "type": "object",
            "description": "Array(3)"
        }));
        assert_eq!(stringify_remote_object(&obj), "Array(3)");
    }

    #[test]
    fn test_stringify_falls_back_to_type_name() {
        let obj = remote_object(json!({"type": "undefined"}));
        assert_eq!(stringify_remote_object(&obj), "undefined");
    }

    #[test]
    fn test_console_event_joins_args() {
        let event: EventConsoleApiCalled = serde_json::from_value(json!({
            "type": "warning",
            "args": [
                {"type": "string", "value": "deprecated"},
                {"type": "number", "value": 3}
            ],
            "executionContextId": 1,
            "timestamp": 0.0
        }))
        .unwrap();

        let entry = entry_from_console_event(&event);
        assert_eq!(entry.level, LogLevel::Warn);
        assert_eq!(entry.text, "deprecated 3");
        assert!(entry.url.is_none());
    }

    #[test]
    fn test_exception_event_uses_description() {
        let event: EventExceptionThrown = serde_json::from_value(json!({
            "timestamp": 0.0,
            "exceptionDetails": {
                "exceptionId": 1,
                "text": "Uncaught",
                "lineNumber": 10,
                "columnNumber": 4,
                "exception": {
                    "type": "object",
                    "description": "Error: boom"
                }
            }
        }))
        .unwrap();

        let entry = entry_from_exception_event(&event);
        assert_eq!(entry.level, LogLevel::Error);
        assert_eq!(entry.text, "Error: boom");
        assert_eq!(entry.line, Some(10));
    }
}

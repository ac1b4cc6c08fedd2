//! Action execution against a live page.
//!
//! Translates parsed agent actions into CDP input events and page commands.
//! Every failure is captured and folded into the returned `ActionResult`;
//! nothing here throws past a cycle.

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchMouseEventParams, InsertTextParams,
};
use chromiumoxide::cdp::browser_protocol::page::{EventDomContentEventFired, NavigateParams};
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::agent::action::{AgentAction, MouseButton, PointerTarget};

const NAVIGATE_TIMEOUT: Duration = Duration::from_secs(15);

/// Resolve an accessibility ref (`eN`) to an interactable element handle.
#[async_trait]
pub trait RefResolver: Send + Sync {
    async fn resolve(&self, reference: &str) -> anyhow::Result<Option<Element>>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

pub struct ActionExecutor {
    page: Page,
    resolver: Arc<dyn RefResolver>,
}

impl ActionExecutor {
    pub fn new(page: Page, resolver: Arc<dyn RefResolver>) -> Self {
        Self { page, resolver }
    }

    /// Execute one tool call. Unknown kinds and all runtime failures come
    /// back as `{success: false, error}`.
    pub async fn execute(&self, name: &str, input: &Value) -> ActionResult {
        let action = match AgentAction::parse(name, input) {
            Ok(action) => action,
            Err(e) => return ActionResult::fail(e),
        };

        match self.dispatch(&action).await {
            Ok(()) => ActionResult::ok(),
            Err(e) => ActionResult::fail(e.to_string()),
        }
    }

    async fn dispatch(&self, action: &AgentAction) -> anyhow::Result<()> {
        match action {
            AgentAction::Click { target, button } => {
                let (x, y) = self.point_of(target).await?;
                self.click_at(x, y, *button).await
            }
            AgentAction::Type {
                reference,
                text,
                clear_first,
            } => self.type_text(reference.as_deref(), text, *clear_first).await,
            AgentAction::Scroll { direction, amount } => {
                let (x, y) = self.viewport_center().await;
                let (dx, dy) = direction.deltas(*amount);
                self.mouse_event(json!({
                    "type": "mouseWheel",
                    "x": x,
                    "y": y,
                    "deltaX": dx,
                    "deltaY": dy,
                }))
                .await
            }
            AgentAction::Navigate { url } => self.navigate(url).await,
            AgentAction::Keyboard { key } => self.press_combo(key).await,
            AgentAction::Wait { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(())
            }
            AgentAction::Hover { target } => {
                let (x, y) = self.point_of(target).await?;
                self.mouse_event(json!({ "type": "mouseMoved", "x": x, "y": y }))
                    .await
            }
            AgentAction::Select { reference, value } => {
                let element = self.resolve_required(reference).await?;
                self.select_option(&element, value).await
            }
            // Terminal actions carry no page work; the loop finalizes them.
            AgentAction::Done { .. } | AgentAction::Fail { .. } => Ok(()),
        }
    }

    async fn resolve_required(&self, reference: &str) -> anyhow::Result<Element> {
        self.resolver
            .resolve(reference)
            .await?
            .ok_or_else(|| anyhow!("Element not found for ref '{}'", reference))
    }

    async fn point_of(&self, target: &PointerTarget) -> anyhow::Result<(f64, f64)> {
        match target {
            PointerTarget::Ref(reference) => {
                let element = self.resolve_required(reference).await?;
                let point = element
                    .clickable_point()
                    .await
                    .context("element has no clickable point")?;
                Ok((point.x, point.y))
            }
            PointerTarget::Coords { x, y } => Ok((*x, *y)),
        }
    }

    async fn click_at(&self, x: f64, y: f64, button: MouseButton) -> anyhow::Result<()> {
        self.mouse_event(json!({
            "type": "mousePressed",
            "x": x,
            "y": y,
            "button": button.as_cdp(),
            "clickCount": 1,
        }))
        .await?;
        self.mouse_event(json!({
            "type": "mouseReleased",
            "x": x,
            "y": y,
            "button": button.as_cdp(),
            "clickCount": 1,
        }))
        .await
    }

    async fn type_text(
        &self,
        reference: Option<&str>,
        text: &str,
        clear_first: bool,
    ) -> anyhow::Result<()> {
        match reference {
            Some(reference) => {
                let element = self.resolve_required(reference).await?;
                if clear_first {
                    // Fill semantics: focus, select everything, replace.
                    element.focus().await.context("focus failed")?;
                    self.press_combo("Control+a").await?;
                } else {
                    element.click().await.context("click failed")?;
                }
            }
            None => {
                if clear_first {
                    self.press_combo("Control+a").await?;
                }
            }
        }
        self.insert_text(text).await
    }

    async fn navigate(&self, url: &str) -> anyhow::Result<()> {
        let mut loaded = self
            .page
            .event_listener::<EventDomContentEventFired>()
            .await
            .context("failed to listen for navigation")?;

        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| anyhow!("invalid URL {}: {}", url, e))?;
        let response = self.page.execute(params).await.context("navigate failed")?;
        if let Some(error_text) = &response.result.error_text {
            bail!("navigation error: {}", error_text);
        }

        tokio::time::timeout(NAVIGATE_TIMEOUT, loaded.next())
            .await
            .map_err(|_| anyhow!("navigation to {} timed out after 15s", url))?;
        Ok(())
    }

    /// Press a key or a `Modifier+key` combo such as `Control+a`.
    async fn press_combo(&self, combo: &str) -> anyhow::Result<()> {
        let (modifiers, key) = parse_combo(combo)?;

        let mut down = json!({ "type": "keyDown", "key": key, "modifiers": modifiers });
        if modifiers == 0 && key.chars().count() == 1 {
            down["text"] = json!(key);
        }
        self.key_event(down).await?;
        self.key_event(json!({ "type": "keyUp", "key": key, "modifiers": modifiers }))
            .await
    }

    async fn select_option(&self, element: &Element, value: &str) -> anyhow::Result<()> {
        // Match by value first, then by visible label.
        let wanted = serde_json::to_string(value)?;
        let js = format!(
            r#"function() {{
                const wanted = {wanted};
                if (this.tagName !== 'SELECT') throw new Error('not a select element');
                let option = Array.from(this.options).find(o => o.value === wanted);
                if (!option) {{
                    option = Array.from(this.options).find(
                        o => o.label === wanted || o.text.trim() === wanted
                    );
                }}
                if (!option) throw new Error('no option matching ' + wanted);
                this.value = option.value;
                this.dispatchEvent(new Event('input', {{ bubbles: true }}));
                this.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return this.value;
            }}"#
        );

        let result = element
            .call_js_fn(js, false)
            .await
            .context("select failed")?;
        if let Some(details) = result.exception_details {
            let message = details
                .exception
                .and_then(|ex| ex.description)
                .unwrap_or(details.text);
            bail!("select failed: {}", message);
        }
        Ok(())
    }

    async fn viewport_center(&self) -> (f64, f64) {
        let result = self
            .page
            .evaluate("({ x: window.innerWidth / 2, y: window.innerHeight / 2 })")
            .await
            .ok()
            .and_then(|r| r.into_value::<Value>().ok());

        match result {
            Some(v) => (
                v.get("x").and_then(Value::as_f64).unwrap_or(400.0),
                v.get("y").and_then(Value::as_f64).unwrap_or(300.0),
            ),
            None => (400.0, 300.0),
        }
    }

    async fn mouse_event(&self, value: Value) -> anyhow::Result<()> {
        let params: DispatchMouseEventParams =
            serde_json::from_value(value).context("invalid mouse event")?;
        self.page
            .execute(params)
            .await
            .context("mouse event failed")?;
        Ok(())
    }

    async fn key_event(&self, value: Value) -> anyhow::Result<()> {
        let params: DispatchKeyEventParams =
            serde_json::from_value(value).context("invalid key event")?;
        self.page.execute(params).await.context("key event failed")?;
        Ok(())
    }

    async fn insert_text(&self, text: &str) -> anyhow::Result<()> {
        let params: InsertTextParams = serde_json::from_value(json!({ "text": text }))
            .context("invalid insertText params")?;
        self.page
            .execute(params)
            .await
            .context("insertText failed")?;
        Ok(())
    }
}

/// CDP modifier bitmask: Alt=1, Control=2, Meta=4, Shift=8.
fn parse_combo(combo: &str) -> anyhow::Result<(i64, String)> {
    let parts: Vec<&str> = combo.split('+').map(str::trim).collect();
    let (key, modifier_parts) = match parts.split_last() {
        Some((key, rest)) if !key.is_empty() => (key.to_string(), rest),
        _ => bail!("keyboard requires a key"),
    };

    let mut modifiers = 0i64;
    for part in modifier_parts {
        modifiers |= match part.to_ascii_lowercase().as_str() {
            "alt" => 1,
            "control" | "ctrl" => 2,
            "meta" | "command" | "cmd" => 4,
            "shift" => 8,
            other => bail!("unknown modifier '{}'", other),
        };
    }

    Ok((modifiers, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_key() {
        assert_eq!(parse_combo("Enter").unwrap(), (0, "Enter".to_string()));
    }

    #[test]
    fn test_parse_combo_modifiers() {
        assert_eq!(parse_combo("Control+a").unwrap(), (2, "a".to_string()));
        assert_eq!(
            parse_combo("Control+Shift+Tab").unwrap(),
            (10, "Tab".to_string())
        );
        assert_eq!(parse_combo("Meta+c").unwrap(), (4, "c".to_string()));
    }

    #[test]
    fn test_parse_combo_rejects_garbage() {
        assert!(parse_combo("").is_err());
        assert!(parse_combo("Hyper+x").is_err());
    }
}

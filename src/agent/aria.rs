//! Accessibility snapshot extraction and ref resolution.
//!
//! The perception loop only depends on the `AriaProvider` trait; the default
//! implementation here renders a YAML-like outline of the visible DOM with
//! `[ref=eN]` markers, tagging each interactable element with a `data-ref`
//! attribute so the paired resolver can find it again.

use anyhow::Context;
use async_trait::async_trait;
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;

use crate::agent::executor::RefResolver;

#[async_trait]
pub trait AriaProvider: Send + Sync {
    async fn snapshot(&self, page: &Page) -> anyhow::Result<String>;
}

/// Reads the DOM without modifying layout; only `data-ref` attributes are
/// written, and re-running the script reassigns them from scratch.
const SNAPSHOT_JS: &str = r#"
(() => {
  const SKIP = new Set(['SCRIPT', 'STYLE', 'NOSCRIPT', 'TEMPLATE', 'LINK', 'META', 'SVG']);
  const INTERACTIVE = new Set(['A', 'BUTTON', 'INPUT', 'TEXTAREA', 'SELECT']);
  let nextRef = 0;
  const lines = [];

  function isVisible(el) {
    if (el.offsetParent === null && el.tagName !== 'BODY' && el.tagName !== 'HTML') return false;
    const s = getComputedStyle(el);
    return s.display !== 'none' && s.visibility !== 'hidden' && s.opacity !== '0';
  }

  function role(el) {
    const explicit = el.getAttribute('role');
    if (explicit) return explicit;
    const tag = el.tagName;
    if (tag === 'A') return 'link';
    if (tag === 'BUTTON') return 'button';
    if (tag === 'SELECT') return 'combobox';
    if (tag === 'TEXTAREA') return 'textbox';
    if (tag === 'INPUT') {
      const type = (el.type || 'text').toLowerCase();
      if (type === 'submit' || type === 'button') return 'button';
      if (type === 'checkbox') return 'checkbox';
      if (type === 'radio') return 'radio';
      return 'textbox';
    }
    if (/^H[1-6]$/.test(tag)) return 'heading';
    if (tag === 'IMG') return 'img';
    return null;
  }

  function label(el) {
    const aria = el.getAttribute('aria-label');
    if (aria) return aria;
    if (el.tagName === 'INPUT' || el.tagName === 'TEXTAREA') {
      return el.placeholder || el.name || '';
    }
    if (el.tagName === 'IMG') return el.alt || '';
    return (el.textContent || '').trim().replace(/\s+/g, ' ').slice(0, 80);
  }

  function walk(node, depth) {
    if (depth > 20) return;
    for (const child of node.children) {
      if (SKIP.has(child.tagName)) continue;
      if (!isVisible(child)) continue;
      const indent = '  '.repeat(depth);

      if (INTERACTIVE.has(child.tagName)) {
        const ref = 'e' + (nextRef++);
        child.setAttribute('data-ref', ref);
        lines.push(indent + '- ' + role(child) + ' "' + label(child) + '" [ref=' + ref + ']');
        walk(child, depth + 1);
      } else {
        const r = role(child);
        if (r) {
          lines.push(indent + '- ' + r + ' "' + label(child) + '"');
          walk(child, depth + 1);
        } else if (child.children.length === 0) {
          const text = (child.textContent || '').trim().replace(/\s+/g, ' ');
          if (text.length > 2) {
            lines.push(indent + '- text "' + text.slice(0, 120) + '"');
          }
        } else {
          walk(child, depth);
        }
      }
    }
  }

  walk(document.body, 0);
  return lines.join('\n');
})()
"#;

pub struct DomAriaProvider;

#[async_trait]
impl AriaProvider for DomAriaProvider {
    async fn snapshot(&self, page: &Page) -> anyhow::Result<String> {
        let result = page
            .evaluate(SNAPSHOT_JS)
            .await
            .context("snapshot script failed")?;
        let snapshot: String = result
            .into_value()
            .context("snapshot script returned no string")?;
        Ok(snapshot)
    }
}

/// Resolves `eN` refs via the `data-ref` attribute written by the snapshot
/// script. Refs from a stale snapshot simply fail to resolve.
pub struct DataRefResolver {
    page: Page,
}

impl DataRefResolver {
    pub fn new(page: Page) -> Self {
        Self { page }
    }
}

#[async_trait]
impl RefResolver for DataRefResolver {
    async fn resolve(&self, reference: &str) -> anyhow::Result<Option<Element>> {
        // Refs are machine-generated; anything else is not worth a selector.
        if reference.is_empty()
            || !reference
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Ok(None);
        }

        match self
            .page
            .find_element(format!("[data-ref=\"{}\"]", reference))
            .await
        {
            Ok(element) => Ok(Some(element)),
            Err(_) => Ok(None),
        }
    }
}

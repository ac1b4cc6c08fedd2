//! Named long-lived pages.
//!
//! The registry is the unit of isolation for the control plane: every HTTP
//! request and perception loop addresses a page by its user-supplied name.
//! Each entry owns the page handle, its console log, at most one recording,
//! and the background CDP subscriptions feeding both.

pub mod console;

use chromiumoxide::cdp::browser_protocol::page::StopScreencastParams;
use chromiumoxide::cdp::browser_protocol::target::CloseTargetParams;
use chromiumoxide::page::Page;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::error::{Result, StudioError};
use crate::pages::console::ConsoleLogEntry;
use crate::recording::types::RecordingState;

pub const MAX_NAME_LEN: usize = 256;

/// A registered page and everything tied to its lifetime.
pub struct PageEntry {
    pub name: String,
    pub page: Page,
    pub target_id: String,
    pub console: Arc<Mutex<Vec<ConsoleLogEntry>>>,
    pub recording: Arc<Mutex<Option<RecordingState>>>,
    /// Path of the most recently produced video, if any.
    pub last_video: Mutex<Option<String>>,
    /// Console-capture and screencast tasks; aborted on teardown.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PageEntry {
    pub fn console_len(&self) -> usize {
        self.console.lock().map(|logs| logs.len()).unwrap_or(0)
    }

    pub fn console_snapshot(&self) -> Vec<ConsoleLogEntry> {
        self.console
            .lock()
            .map(|logs| logs.clone())
            .unwrap_or_default()
    }

    pub fn clear_console(&self) -> usize {
        match self.console.lock() {
            Ok(mut logs) => {
                let cleared = logs.len();
                logs.clear();
                cleared
            }
            Err(_) => 0,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
            .lock()
            .map(|rec| rec.as_ref().map(|r| r.is_active).unwrap_or(false))
            .unwrap_or(false)
    }

    pub(crate) fn track_task(&self, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(handle);
        }
    }

    /// Stop background work tied to this entry. Safe to call when the target
    /// is already gone; every CDP call here is best-effort.
    async fn teardown(&self, close_target: bool) {
        let was_recording = {
            let mut rec = self.recording.lock().ok();
            match rec.as_deref_mut() {
                Some(slot) => {
                    let active = slot.as_ref().map(|r| r.is_active).unwrap_or(false);
                    *slot = None;
                    active
                }
                None => false,
            }
        };

        if was_recording {
            let _ = self.page.execute(StopScreencastParams::default()).await;
        }

        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }

        if close_target {
            let _ = self
                .page
                .execute(CloseTargetParams::new(self.page.target_id().clone()))
                .await;
        }
    }
}

/// Registry of named pages. Read-mostly; lookups take a read lock,
/// insertion and teardown take the write lock.
pub struct PageRegistry {
    pages: RwLock<HashMap<String, Arc<PageEntry>>>,
    closed_tx: mpsc::UnboundedSender<String>,
}

impl PageRegistry {
    pub fn new() -> Arc<Self> {
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<String>();
        let registry = Arc::new(Self {
            pages: RwLock::new(HashMap::new()),
            closed_tx,
        });

        // Reaper: console streams end when a page closes outside our
        // control (window.close, crash); drop the entry when that happens.
        let weak: Weak<PageRegistry> = Arc::downgrade(&registry);
        tokio::spawn(async move {
            while let Some(name) = closed_rx.recv().await {
                let Some(registry) = weak.upgrade() else {
                    break;
                };
                let removed = registry.pages.write().await.remove(&name);
                if let Some(entry) = removed {
                    log::info!("page '{}' closed, removing from registry", name);
                    entry.teardown(false).await;
                }
            }
        });

        registry
    }

    /// Page names are user input: non-empty, at most 256 bytes.
    pub fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(StudioError::InvalidPageName(
                "name must not be empty".to_string(),
            ));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(StudioError::InvalidPageName(format!(
                "name exceeds {} bytes",
                MAX_NAME_LEN
            )));
        }
        Ok(())
    }

    /// Register a page under `name` and start its console capture.
    pub async fn insert(&self, name: &str, page: Page) -> Result<Arc<PageEntry>> {
        Self::validate_name(name)?;

        let mut pages = self.pages.write().await;
        if pages.contains_key(name) {
            return Err(StudioError::InvalidPageName(format!(
                "page '{}' already exists",
                name
            )));
        }

        let target_id = target_id_string(&page);
        let entry = Arc::new(PageEntry {
            name: name.to_string(),
            page: page.clone(),
            target_id,
            console: Arc::new(Mutex::new(Vec::new())),
            recording: Arc::new(Mutex::new(None)),
            last_video: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        });

        let capture = console::spawn_console_capture(
            page,
            name.to_string(),
            Arc::clone(&entry.console),
            self.closed_tx.clone(),
        );
        entry.track_task(capture);

        pages.insert(name.to_string(), Arc::clone(&entry));
        log::info!("registered page '{}'", name);
        Ok(entry)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<PageEntry>> {
        self.pages.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pages.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove a page, stopping its background work and closing the target.
    pub async fn remove(&self, name: &str) -> Option<Arc<PageEntry>> {
        let entry = self.pages.write().await.remove(name)?;
        entry.teardown(true).await;
        log::info!("removed page '{}'", name);
        Some(entry)
    }

    /// Tear down every entry. Called once on process shutdown, before the
    /// browser context is closed.
    pub async fn shutdown(&self) {
        let entries: Vec<Arc<PageEntry>> = self.pages.write().await.drain().map(|(_, e)| e).collect();
        for entry in entries {
            entry.teardown(true).await;
        }
    }
}

#[async_trait::async_trait]
impl crate::agent::perception::PageSource for PageRegistry {
    async fn acquire(&self, name: &str) -> anyhow::Result<Page> {
        self.get(name)
            .await
            .map(|entry| entry.page.clone())
            .ok_or_else(|| anyhow::anyhow!("unknown page '{}'", name))
    }
}

fn target_id_string(page: &Page) -> String {
    serde_json::to_value(page.target_id())
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(PageRegistry::validate_name("checkout").is_ok());
        assert!(PageRegistry::validate_name("").is_err());
        assert!(PageRegistry::validate_name(&"x".repeat(256)).is_ok());
        assert!(PageRegistry::validate_name(&"x".repeat(257)).is_err());
    }
}

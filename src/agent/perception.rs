//! The perception loop: capture, reason, act, repeat.
//!
//! Drives one page through perception-action cycles until the model calls a
//! terminal action or a budget, cycle, or error limit stops the run. Every
//! cycle leaves exactly one audit record behind.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, EventDomContentEventFired, EventJavascriptDialogOpening,
    EventLifecycleEvent, HandleJavaScriptDialogParams, SetLifecycleEventsEnabledParams,
};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::agent::action::AgentAction;
use crate::agent::aria::{AriaProvider, DataRefResolver, DomAriaProvider};
use crate::agent::audit::{AuditLogger, CycleEntry, LoopResult};
use crate::agent::budget::{BudgetController, BudgetLimits, TokenUsage};
use crate::agent::executor::{ActionExecutor, ActionResult};
use crate::agent::history::{compress_history, DEFAULT_MAX_DETAILED};
use crate::agent::safety::{SafetyConfig, SafetyPolicy};
use crate::agent::sampler::{FrameSampler, SamplerConfig};
use crate::agent::vision::{FrameRequest, VisionClient};
use crate::error::{Result, StudioError};

const STUCK_WARNING: &str =
    " WARNING: The last three actions were identical and do not seem to make progress. Try a different approach.";
const LOAD_WAIT: Duration = Duration::from_secs(10);

/// Hands out (and re-resolves) page handles by name. Implemented by the
/// page registry; the loop re-acquires through this seam when a handle dies
/// across a navigation.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn acquire(&self, name: &str) -> anyhow::Result<Page>;
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub model: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// JPEG quality of captured screenshots.
    pub screenshot_quality: u32,
    pub max_cycles: u32,
    pub max_consecutive_errors: u32,
    /// Pause after non-navigate, non-wait actions.
    pub settle_time_ms: u64,
    pub api_timeout_secs: u64,
    /// Character cap applied to the ARIA snapshot before prompting.
    pub aria_char_cap: usize,
    pub audit_dir: PathBuf,
    pub sampler: SamplerConfig,
    pub budget: BudgetLimits,
    pub safety: SafetyConfig,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            viewport_width: 1024,
            viewport_height: 768,
            screenshot_quality: 70,
            max_cycles: 50,
            max_consecutive_errors: 5,
            settle_time_ms: 300,
            api_timeout_secs: 30,
            aria_char_cap: 40_000,
            audit_dir: PathBuf::from("./recordings"),
            sampler: SamplerConfig::default(),
            budget: BudgetLimits::default(),
            safety: SafetyConfig::default(),
        }
    }
}

pub struct PerceptionLoop {
    config: LoopConfig,
    vision: VisionClient,
    aria: Arc<dyn AriaProvider>,
}

impl PerceptionLoop {
    pub fn new(config: LoopConfig, vision: VisionClient, aria: Arc<dyn AriaProvider>) -> Self {
        Self {
            config,
            vision,
            aria,
        }
    }

    /// Build a loop with the default collaborators: the Anthropic client
    /// configured from the environment and the DOM-based ARIA provider.
    pub fn from_env(config: LoopConfig) -> Result<Self> {
        let vision = VisionClient::from_env(
            &config.model,
            Duration::from_secs(config.api_timeout_secs),
        )?;
        Ok(Self::new(config, vision, Arc::new(DomAriaProvider)))
    }

    pub async fn run(
        &self,
        client: &dyn PageSource,
        page_name: &str,
        task: &str,
    ) -> Result<LoopResult> {
        let mut page = client
            .acquire(page_name)
            .await
            .map_err(|e| StudioError::Other(format!("failed to acquire page '{}': {}", page_name, e)))?;

        let task_id = format!("perception-{}", chrono::Utc::now().timestamp_millis());
        let audit = AuditLogger::create(&self.config.audit_dir, &task_id).await?;
        log::info!("perception run {} started on page '{}'", task_id, page_name);

        self.prepare_page(&page).await;

        let mut sampler = FrameSampler::new(self.config.sampler.clone());
        let mut budget = BudgetController::new(self.config.budget);
        let safety = SafetyPolicy::new(&self.config.safety)?;
        let mut entries: Vec<CycleEntry> = Vec::new();
        let mut consecutive_errors: u32 = 0;

        for cycle in 0..self.config.max_cycles as usize {
            if let Err(reason) = budget.can_proceed() {
                log::info!("budget exhausted: {}", reason);
                return self.finalize(&audit, &budget, false, reason, None).await;
            }

            let cycle_started = Instant::now();
            let timestamp = chrono::Utc::now().to_rfc3339();

            let frame = match self
                .capture_frame(client, page_name, &mut page, &mut sampler)
                .await
            {
                Ok(frame) => frame,
                Err(e) => {
                    let entry = error_entry(
                        cycle,
                        &timestamp,
                        String::new(),
                        format!("screenshot failed: {}", e),
                        cycle_started.elapsed(),
                    );
                    self.record(&audit, &mut budget, &mut entries, entry, TokenUsage::default())
                        .await?;
                    consecutive_errors += 1;
                    if consecutive_errors >= self.config.max_consecutive_errors {
                        return self.fail_on_errors(&audit, &budget, consecutive_errors).await;
                    }
                    continue;
                }
            };

            // Advisory only: the agent may want to act on an unchanged page.
            let _changed = sampler.has_changed(&frame).unwrap_or(true);

            let frame_path = audit
                .save_frame(cycle, &frame)
                .await
                .map(|p| p.to_string_lossy().to_string())?;

            let aria_snapshot = match self.aria.snapshot(&page).await {
                Ok(snapshot) => truncate_snapshot(&snapshot, self.config.aria_char_cap),
                Err(e) => {
                    log::debug!("aria snapshot failed: {}", e);
                    "(ARIA snapshot unavailable)".to_string()
                }
            };

            let history = compress_history(&entries, DEFAULT_MAX_DETAILED);

            let mut cycle_task = task.to_string();
            if is_stuck(&entries) {
                log::warn!("last three actions identical, nudging the model");
                cycle_task.push_str(STUCK_WARNING);
            }

            let page_url = page.url().await.ok().flatten().unwrap_or_default();
            let frame_b64 = general_purpose::STANDARD.encode(&frame);

            let analysis = match self
                .vision
                .analyze_frame(FrameRequest {
                    frame_base64: &frame_b64,
                    aria_snapshot: &aria_snapshot,
                    history: &history,
                    task: &cycle_task,
                })
                .await
            {
                Ok(analysis) => analysis,
                Err(e) => {
                    let entry = error_entry(
                        cycle,
                        &timestamp,
                        page_url,
                        format!("vision call failed: {}", e),
                        cycle_started.elapsed(),
                    );
                    self.record(&audit, &mut budget, &mut entries, entry, TokenUsage::default())
                        .await?;
                    consecutive_errors += 1;
                    if consecutive_errors >= self.config.max_consecutive_errors {
                        return self.fail_on_errors(&audit, &budget, consecutive_errors).await;
                    }
                    continue;
                }
            };

            log::debug!(
                "cycle {}: model chose {} {}",
                cycle,
                analysis.action_name,
                analysis.action_input
            );

            if let Err(reason) = safety.check(&analysis.action_name, &analysis.action_input) {
                log::warn!("action blocked: {}", reason);
                let entry = CycleEntry {
                    cycle,
                    timestamp,
                    page_url,
                    frame_path: Some(frame_path),
                    action_name: analysis.action_name.clone(),
                    action_input: analysis.action_input.clone(),
                    reasoning: analysis.reasoning.clone(),
                    success: false,
                    error: Some(format!("Blocked: {}", reason)),
                    tokens: Some(analysis.usage),
                    duration_ms: cycle_started.elapsed().as_millis() as u64,
                };
                self.record(&audit, &mut budget, &mut entries, entry, analysis.usage)
                    .await?;
                consecutive_errors += 1;
                if consecutive_errors >= self.config.max_consecutive_errors {
                    return self.fail_on_errors(&audit, &budget, consecutive_errors).await;
                }
                continue;
            }

            // Terminal actions record a clean cycle, then finalize below.
            let action_name = analysis.action_name.clone();
            let mut terminal: Option<(bool, String, Option<Value>)> = None;
            let exec_result = if AgentAction::is_terminal(&action_name) {
                match AgentAction::parse(&action_name, &analysis.action_input) {
                    Ok(AgentAction::Done {
                        success,
                        summary,
                        extracted_data,
                    }) => {
                        terminal = Some((success, summary, extracted_data));
                        ActionResult::ok()
                    }
                    Ok(AgentAction::Fail { reason }) => {
                        // The action itself succeeded; the task failed.
                        terminal = Some((false, reason, None));
                        ActionResult::ok()
                    }
                    _ => ActionResult::ok(),
                }
            } else {
                let resolver = Arc::new(DataRefResolver::new(page.clone()));
                ActionExecutor::new(page.clone(), resolver)
                    .execute(&action_name, &analysis.action_input)
                    .await
            };

            let entry = CycleEntry {
                cycle,
                timestamp,
                page_url,
                frame_path: Some(frame_path),
                action_name: action_name.clone(),
                action_input: analysis.action_input.clone(),
                reasoning: analysis.reasoning.clone(),
                success: exec_result.success,
                error: exec_result.error.clone(),
                tokens: Some(analysis.usage),
                duration_ms: cycle_started.elapsed().as_millis() as u64,
            };
            self.record(&audit, &mut budget, &mut entries, entry, analysis.usage)
                .await?;

            if let Some((success, summary, extracted_data)) = terminal {
                return self
                    .finalize(&audit, &budget, success, summary, extracted_data)
                    .await;
            }

            if exec_result.success {
                consecutive_errors = 0;
            } else {
                consecutive_errors += 1;
                if consecutive_errors >= self.config.max_consecutive_errors {
                    return self.fail_on_errors(&audit, &budget, consecutive_errors).await;
                }
            }

            // Settle before the next capture.
            match action_name.as_str() {
                "navigate" => {
                    wait_for_network_idle(&page, LOAD_WAIT).await;
                    sampler.force_capture();
                }
                "wait" => {}
                _ => tokio::time::sleep(Duration::from_millis(self.config.settle_time_ms)).await,
            }
        }

        let summary = format!("Max cycles reached ({})", self.config.max_cycles);
        self.finalize(&audit, &budget, false, summary, None).await
    }

    /// One screenshot attempt, with a single page re-acquisition when the
    /// handle died across a navigation.
    async fn capture_frame(
        &self,
        client: &dyn PageSource,
        page_name: &str,
        page: &mut Page,
        sampler: &mut FrameSampler,
    ) -> anyhow::Result<Vec<u8>> {
        match page.screenshot(self.screenshot_params()).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                let message = e.to_string();
                if message.contains("Target closed") || message.contains("Target page") {
                    log::warn!(
                        "page handle for '{}' invalidated ({}), re-acquiring",
                        page_name,
                        message
                    );
                    *page = client
                        .acquire(page_name)
                        .await
                        .context("page re-acquisition failed")?;
                    self.prepare_page(page).await;
                    wait_for_dom_content(page, LOAD_WAIT).await;
                    sampler.force_capture();
                    page.screenshot(self.screenshot_params())
                        .await
                        .context("screenshot failed after re-acquisition")
                } else {
                    Err(anyhow!(message))
                }
            }
        }
    }

    fn screenshot_params(&self) -> ScreenshotParams {
        ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Jpeg)
            .quality(self.config.screenshot_quality as i64)
            .build()
    }

    /// Best-effort page setup: viewport, lifecycle events for settle waits,
    /// and an auto-accepting dialog handler so the loop never hangs on
    /// alert/confirm.
    async fn prepare_page(&self, page: &Page) {
        if let Ok(params) = serde_json::from_value::<SetDeviceMetricsOverrideParams>(json!({
            "width": self.config.viewport_width,
            "height": self.config.viewport_height,
            "deviceScaleFactor": 1.0,
            "mobile": false,
        })) {
            let _ = page.execute(params).await;
        }
        if let Ok(params) =
            serde_json::from_value::<SetLifecycleEventsEnabledParams>(json!({ "enabled": true }))
        {
            let _ = page.execute(params).await;
        }
        spawn_dialog_autoaccept(page);
    }

    async fn record(
        &self,
        audit: &AuditLogger,
        budget: &mut BudgetController,
        entries: &mut Vec<CycleEntry>,
        entry: CycleEntry,
        usage: TokenUsage,
    ) -> Result<()> {
        budget.on_cycle_complete(usage);
        audit.log_cycle(&entry, Some(&budget.snapshot())).await?;
        entries.push(entry);
        Ok(())
    }

    async fn fail_on_errors(
        &self,
        audit: &AuditLogger,
        budget: &BudgetController,
        errors: u32,
    ) -> Result<LoopResult> {
        let summary = format!("Too many consecutive errors ({})", errors);
        self.finalize(audit, budget, false, summary, None).await
    }

    async fn finalize(
        &self,
        audit: &AuditLogger,
        budget: &BudgetController,
        success: bool,
        summary: String,
        extracted_data: Option<Value>,
    ) -> Result<LoopResult> {
        let result = LoopResult {
            success,
            summary,
            cycles: budget.cycles(),
            extracted_data,
            budget: budget.snapshot(),
        };
        audit.save_summary(&result).await?;
        log::info!(
            "perception run finished: success={} after {} cycles ({})",
            result.success,
            result.cycles,
            result.summary
        );
        Ok(result)
    }
}

fn error_entry(
    cycle: usize,
    timestamp: &str,
    page_url: String,
    message: String,
    elapsed: Duration,
) -> CycleEntry {
    CycleEntry {
        cycle,
        timestamp: timestamp.to_string(),
        page_url,
        frame_path: None,
        action_name: "error".to_string(),
        action_input: json!({}),
        reasoning: None,
        success: false,
        error: Some(message),
        tokens: None,
        duration_ms: elapsed.as_millis() as u64,
    }
}

/// Three identical (kind, input) pairs in a row reads as the agent spinning.
fn is_stuck(entries: &[CycleEntry]) -> bool {
    if entries.len() < 3 {
        return false;
    }
    let last = &entries[entries.len() - 1];
    entries[entries.len() - 3..].iter().all(|e| {
        e.action_name == last.action_name && e.action_input == last.action_input
    })
}

/// Cap the snapshot, preferring the last newline before the cap, and flag
/// the cut.
fn truncate_snapshot(snapshot: &str, cap: usize) -> String {
    if snapshot.len() <= cap {
        return snapshot.to_string();
    }
    let mut cut = cap.min(snapshot.len());
    while cut > 0 && !snapshot.is_char_boundary(cut) {
        cut -= 1;
    }
    let head = &snapshot[..cut];
    let cut_at = head.rfind('\n').unwrap_or(cut);
    format!("{}\n... (snapshot truncated)", &head[..cut_at])
}

fn spawn_dialog_autoaccept(page: &Page) {
    let page = page.clone();
    tokio::spawn(async move {
        let Ok(mut dialogs) = page.event_listener::<EventJavascriptDialogOpening>().await else {
            return;
        };
        while let Some(dialog) = dialogs.next().await {
            log::debug!("auto-accepting dialog: {}", dialog.message);
            if let Ok(params) =
                serde_json::from_value::<HandleJavaScriptDialogParams>(json!({ "accept": true }))
            {
                let _ = page.execute(params).await;
            }
        }
    });
}

async fn wait_for_dom_content(page: &Page, timeout: Duration) {
    if let Ok(mut loaded) = page.event_listener::<EventDomContentEventFired>().await {
        let _ = tokio::time::timeout(timeout, loaded.next()).await;
    }
}

async fn wait_for_network_idle(page: &Page, timeout: Duration) {
    if let Ok(mut lifecycle) = page.event_listener::<EventLifecycleEvent>().await {
        let _ = tokio::time::timeout(timeout, async {
            while let Some(event) = lifecycle.next().await {
                if event.name == "networkIdle" {
                    break;
                }
            }
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(cycle: usize, name: &str, input: Value) -> CycleEntry {
        CycleEntry {
            cycle,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            page_url: String::new(),
            frame_path: None,
            action_name: name.to_string(),
            action_input: input,
            reasoning: None,
            success: true,
            error: None,
            tokens: None,
            duration_ms: 0,
        }
    }

    #[test]
    fn test_stuck_detection_needs_three_identical() {
        let same = || entry(0, "click", json!({"ref": "e5"}));
        assert!(!is_stuck(&[same(), same()]));
        assert!(is_stuck(&[same(), same(), same()]));
        assert!(is_stuck(&[
            entry(0, "scroll", json!({"direction": "down"})),
            same(),
            same(),
            same(),
        ]));
    }

    #[test]
    fn test_stuck_detection_input_sensitive() {
        let entries = vec![
            entry(0, "click", json!({"ref": "e5"})),
            entry(1, "click", json!({"ref": "e5"})),
            entry(2, "click", json!({"ref": "e6"})),
        ];
        assert!(!is_stuck(&entries));
    }

    #[test]
    fn test_truncate_short_snapshot_untouched() {
        assert_eq!(truncate_snapshot("- button \"Go\"", 100), "- button \"Go\"");
    }

    #[test]
    fn test_truncate_cuts_at_newline() {
        let snapshot = "line one\nline two\nline three";
        let truncated = truncate_snapshot(snapshot, 15);
        assert_eq!(truncated, "line one\n... (snapshot truncated)");
    }

    #[test]
    fn test_truncate_without_newline() {
        let snapshot = "x".repeat(50);
        let truncated = truncate_snapshot(&snapshot, 10);
        assert!(truncated.starts_with("xxxxxxxxxx"));
        assert!(truncated.ends_with("... (snapshot truncated)"));
    }

    #[test]
    fn test_default_config() {
        let config = LoopConfig::default();
        assert_eq!(config.viewport_width, 1024);
        assert_eq!(config.viewport_height, 768);
        assert_eq!(config.screenshot_quality, 70);
        assert_eq!(config.max_cycles, 50);
        assert_eq!(config.max_consecutive_errors, 5);
        assert_eq!(config.settle_time_ms, 300);
        assert_eq!(config.api_timeout_secs, 30);
        assert_eq!(config.aria_char_cap, 40_000);
    }
}

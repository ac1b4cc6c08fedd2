//! Task-scoped audit trail.
//!
//! One directory per perception run holding the cycle log (JSONL), the
//! captured frames, and a terminal summary. Field names are flattened to
//! snake_case at this boundary regardless of their in-memory shape.

use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::agent::budget::{BudgetSnapshot, TokenUsage};
use crate::error::Result;

/// One perception-action cycle, written exactly once per loop iteration.
#[derive(Debug, Clone, Serialize)]
pub struct CycleEntry {
    pub cycle: usize,
    pub timestamp: String,
    pub page_url: String,
    pub frame_path: Option<String>,
    pub action_name: String,
    pub action_input: Value,
    pub reasoning: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub tokens: Option<TokenUsage>,
    pub duration_ms: u64,
}

/// Terminal outcome of a perception run.
#[derive(Debug, Clone, Serialize)]
pub struct LoopResult {
    pub success: bool,
    pub summary: String,
    pub cycles: u32,
    pub extracted_data: Option<Value>,
    pub budget: BudgetSnapshot,
}

pub struct AuditLogger {
    dir: PathBuf,
    cycles_path: PathBuf,
    frames_dir: PathBuf,
}

impl AuditLogger {
    /// Create `<out_dir>/<task_id>/frames/` and return a logger scoped to
    /// that task.
    pub async fn create(out_dir: &Path, task_id: &str) -> Result<Self> {
        let dir = out_dir.join(task_id);
        let frames_dir = dir.join("frames");
        tokio::fs::create_dir_all(&frames_dir).await?;
        Ok(Self {
            cycles_path: dir.join("cycles.jsonl"),
            dir,
            frames_dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one line-delimited JSON record to `cycles.jsonl`.
    pub async fn log_cycle(
        &self,
        entry: &CycleEntry,
        budget: Option<&BudgetSnapshot>,
    ) -> Result<()> {
        let mut record = json!({
            "cycle": entry.cycle,
            "timestamp": entry.timestamp,
            "page_url": entry.page_url,
            // Always present; null for cycles that never captured a frame.
            "frame_path": entry.frame_path,
            "action": { "name": entry.action_name, "input": entry.action_input },
            "result": { "success": entry.success },
            "duration_ms": entry.duration_ms,
        });

        let obj = record.as_object_mut().unwrap();
        if let Some(reasoning) = &entry.reasoning {
            obj.insert("reasoning".to_string(), json!(reasoning));
        }
        if let Some(error) = &entry.error {
            record["result"]["error"] = json!(error);
        }
        if let Some(tokens) = &entry.tokens {
            record["tokens"] = json!({ "input": tokens.input, "output": tokens.output });
        }
        if let Some(budget) = budget {
            record["budget_remaining"] = json!({
                "cycles": budget.limits.max_cycles.saturating_sub(budget.cycles),
                "tokens": budget
                    .limits
                    .max_tokens
                    .saturating_sub(budget.input_tokens + budget.output_tokens),
            });
        }

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.cycles_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Write `frames/cycle-<n>.jpg`, overwriting any previous frame for the
    /// same cycle index.
    pub async fn save_frame(&self, cycle: usize, jpeg: &[u8]) -> Result<PathBuf> {
        let path = self.frames_dir.join(format!("cycle-{}.jpg", cycle));
        tokio::fs::write(&path, jpeg).await?;
        Ok(path)
    }

    /// Write the terminal `summary.json` for the run.
    pub async fn save_summary(&self, result: &LoopResult) -> Result<()> {
        let summary = json!({
            "result": {
                "success": result.success,
                "summary": result.summary,
                "cycles": result.cycles,
                "extracted_data": result.extracted_data,
            },
            "budget": result.budget,
            "completed_at": chrono::Utc::now().to_rfc3339(),
        });
        tokio::fs::write(
            self.dir.join("summary.json"),
            serde_json::to_string_pretty(&summary)?,
        )
        .await?;
        Ok(())
    }
}

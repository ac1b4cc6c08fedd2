//! Audit trail file layout tests.
//!
//! The logger runs without a browser, so these exercise the real on-disk
//! format: one snake_case JSON line per cycle, overwritable frame files,
//! and the terminal summary.

use chromacast::agent::audit::{AuditLogger, CycleEntry, LoopResult};
use chromacast::agent::budget::{BudgetController, BudgetLimits, TokenUsage};
use serde_json::{json, Value};
use std::path::PathBuf;

fn temp_out_dir(tag: &str) -> PathBuf {
    let unique = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("chromacast-audit-{}-{}", tag, unique))
}

fn cycle_entry(cycle: usize, success: bool, frame_path: Option<String>) -> CycleEntry {
    CycleEntry {
        cycle,
        timestamp: "2026-08-01T12:00:00Z".to_string(),
        page_url: "http://localhost:8000/".to_string(),
        frame_path,
        action_name: "click".to_string(),
        action_input: json!({ "ref": "e5" }),
        reasoning: Some("the button looks right".to_string()),
        success,
        error: if success {
            None
        } else {
            Some("element not found".to_string())
        },
        tokens: Some(TokenUsage {
            input: 1200,
            output: 60,
        }),
        duration_ms: 450,
    }
}

#[tokio::test]
async fn test_creates_task_directory_layout() {
    let out_dir = temp_out_dir("layout");
    let logger = AuditLogger::create(&out_dir, "perception-1712000000000")
        .await
        .unwrap();

    assert!(out_dir.join("perception-1712000000000").is_dir());
    assert!(out_dir.join("perception-1712000000000/frames").is_dir());
    assert_eq!(logger.dir(), out_dir.join("perception-1712000000000"));

    tokio::fs::remove_dir_all(&out_dir).await.unwrap();
}

#[tokio::test]
async fn test_cycle_records_are_line_delimited_snake_case() {
    let out_dir = temp_out_dir("cycles");
    let logger = AuditLogger::create(&out_dir, "perception-1").await.unwrap();

    let mut budget = BudgetController::new(BudgetLimits::default());
    budget.on_cycle_complete(TokenUsage {
        input: 1200,
        output: 60,
    });

    logger
        .log_cycle(
            &cycle_entry(0, true, Some("frames/cycle-0.jpg".to_string())),
            Some(&budget.snapshot()),
        )
        .await
        .unwrap();
    // Error cycles never capture a frame.
    logger
        .log_cycle(&cycle_entry(1, false, None), None)
        .await
        .unwrap();

    let raw = tokio::fs::read_to_string(logger.dir().join("cycles.jsonl"))
        .await
        .unwrap();
    let lines: Vec<&str> = raw.lines().collect();
    assert_eq!(lines.len(), 2);

    let first: Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["cycle"], 0);
    assert_eq!(first["page_url"], "http://localhost:8000/");
    assert_eq!(first["frame_path"], "frames/cycle-0.jpg");
    assert_eq!(first["action"]["name"], "click");
    assert_eq!(first["action"]["input"]["ref"], "e5");
    assert_eq!(first["result"]["success"], true);
    assert!(first["result"].get("error").is_none());
    assert_eq!(first["tokens"]["input"], 1200);
    assert_eq!(first["tokens"]["output"], 60);
    assert_eq!(first["duration_ms"], 450);
    // Remaining budget is derived from the limits.
    assert_eq!(first["budget_remaining"]["cycles"], 99);
    assert_eq!(first["budget_remaining"]["tokens"], 500_000 - 1260);

    let second: Value = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(second["result"]["success"], false);
    assert_eq!(second["result"]["error"], "element not found");
    // The key stays present as an explicit null.
    assert!(second.as_object().unwrap().contains_key("frame_path"));
    assert!(second["frame_path"].is_null());
    assert!(second.get("budget_remaining").is_none());

    tokio::fs::remove_dir_all(&out_dir).await.unwrap();
}

#[tokio::test]
async fn test_save_frame_overwrites() {
    let out_dir = temp_out_dir("frames");
    let logger = AuditLogger::create(&out_dir, "perception-2").await.unwrap();

    let path = logger.save_frame(3, b"first").await.unwrap();
    assert!(path.ends_with("frames/cycle-3.jpg"));
    logger.save_frame(3, b"second").await.unwrap();

    let contents = tokio::fs::read(&path).await.unwrap();
    assert_eq!(contents, b"second");

    tokio::fs::remove_dir_all(&out_dir).await.unwrap();
}

#[tokio::test]
async fn test_summary_shape() {
    let out_dir = temp_out_dir("summary");
    let logger = AuditLogger::create(&out_dir, "perception-3").await.unwrap();

    let mut budget = BudgetController::new(BudgetLimits::default());
    budget.on_cycle_complete(TokenUsage {
        input: 500,
        output: 100,
    });

    let result = LoopResult {
        success: true,
        summary: "found the price".to_string(),
        cycles: 1,
        extracted_data: Some(json!({ "price": "$19.99" })),
        budget: budget.snapshot(),
    };
    logger.save_summary(&result).await.unwrap();

    let raw = tokio::fs::read_to_string(logger.dir().join("summary.json"))
        .await
        .unwrap();
    let summary: Value = serde_json::from_str(&raw).unwrap();

    assert_eq!(summary["result"]["success"], true);
    assert_eq!(summary["result"]["summary"], "found the price");
    assert_eq!(summary["result"]["cycles"], 1);
    assert_eq!(summary["result"]["extracted_data"]["price"], "$19.99");
    assert_eq!(summary["budget"]["cycles"], 1);
    assert_eq!(summary["budget"]["input_tokens"], 500);
    assert_eq!(summary["budget"]["output_tokens"], 100);
    assert!(summary["completed_at"].is_string());

    tokio::fs::remove_dir_all(&out_dir).await.unwrap();
}

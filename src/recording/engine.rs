//! Per-page screencast lifecycle.
//!
//! State machine per page: idle -> recording -> encoding -> idle, with an
//! abort path on page close or shutdown. Frames arrive on a CDP event
//! stream, get acked immediately, and accumulate in memory until stop.

use base64::{engine::general_purpose, Engine as _};
use chromiumoxide::cdp::browser_protocol::page::{
    EventScreencastFrame, ScreencastFrameAckParams, StartScreencastParams, StopScreencastParams,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::error::{Result, StudioError};
use crate::pages::PageEntry;
use crate::recording::encoder::VideoEncoder;
use crate::recording::types::{
    key_frame_indices, sanitize_name, RecordingOptions, RecordingState, StopOutcome,
};

/// Status block for the recording status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    pub is_recording: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub console_log_count: Option<usize>,
}

pub struct RecordingEngine {
    recordings_dir: PathBuf,
    encoder: VideoEncoder,
}

impl RecordingEngine {
    pub fn new(recordings_dir: PathBuf) -> Self {
        Self {
            recordings_dir,
            encoder: VideoEncoder::new(),
        }
    }

    pub fn status(&self, entry: &PageEntry) -> RecordingStatus {
        let rec = entry.recording.lock().ok();
        match rec.as_ref().and_then(|slot| slot.as_ref()) {
            Some(state) if state.is_active => RecordingStatus {
                is_recording: true,
                started_at: Some(state.started_at.clone()),
                frame_count: Some(state.frame_count),
                console_log_count: Some(
                    entry
                        .console_len()
                        .saturating_sub(state.recording_start_index),
                ),
            },
            _ => RecordingStatus {
                is_recording: false,
                started_at: None,
                frame_count: None,
                console_log_count: None,
            },
        }
    }

    /// Begin a screencast on the page. Errors with "already in progress"
    /// when a recording is active (the server maps that onto 409).
    pub async fn start(&self, entry: &Arc<PageEntry>, options: RecordingOptions) -> Result<()> {
        let options = clamp_options(options);

        tokio::fs::create_dir_all(&self.recordings_dir).await?;

        let started = chrono::Utc::now();
        let started_at_millis = started.timestamp_millis();
        let output_path = self.recordings_dir.join(format!(
            "{}-{}.webm",
            sanitize_name(&entry.name),
            started_at_millis
        ));

        {
            let mut slot = entry
                .recording
                .lock()
                .map_err(|_| StudioError::Recording("recording state poisoned".to_string()))?;
            if slot.as_ref().map(|r| r.is_active).unwrap_or(false) {
                return Err(StudioError::Recording(
                    "Recording already in progress".to_string(),
                ));
            }
            *slot = Some(RecordingState {
                is_active: true,
                started_at: started.to_rfc3339(),
                started_at_millis,
                started_instant: Instant::now(),
                frame_count: 0,
                frames: Vec::new(),
                options: options.clone(),
                output_path: output_path.clone(),
                recording_start_index: entry.console_len(),
            });
        }

        // Subscribe before starting the cast so no frame is missed.
        let frames = entry
            .page
            .event_listener::<EventScreencastFrame>()
            .await
            .map_err(|e| {
                clear_slot(entry);
                StudioError::Recording(format!("screencast subscription failed: {}", e))
            })?;
        let task = spawn_screencast_task(entry.page.clone(), Arc::clone(&entry.recording), frames);
        entry.track_task(task);

        let params: StartScreencastParams = serde_json::from_value(json!({
            "format": "jpeg",
            "quality": options.quality,
            "maxWidth": options.max_width,
            "maxHeight": options.max_height,
            "everyNthFrame": options.every_nth_frame,
        }))?;
        if let Err(e) = entry.page.execute(params).await {
            clear_slot(entry);
            return Err(StudioError::Recording(format!(
                "Page.startScreencast failed: {}",
                e
            )));
        }

        log::info!(
            "recording started on '{}' -> {}",
            entry.name,
            output_path.display()
        );
        Ok(())
    }

    /// Stop the screencast, encode the buffered frames, extract key frames,
    /// and write the summary record.
    pub async fn stop(&self, entry: &Arc<PageEntry>) -> Result<StopOutcome> {
        // Drain the state; in-flight frame acks after this point are
        // tolerated but their frames are dropped.
        let mut state = {
            let mut slot = entry
                .recording
                .lock()
                .map_err(|_| StudioError::Recording("recording state poisoned".to_string()))?;
            match slot.take() {
                Some(state) if state.is_active => state,
                other => {
                    *slot = other;
                    return Err(StudioError::Recording(
                        "No recording in progress".to_string(),
                    ));
                }
            }
        };
        state.is_active = false;

        let _ = entry.page.execute(StopScreencastParams::default()).await;

        let duration_ms = state.started_instant.elapsed().as_millis() as u64;
        let stopped_at = chrono::Utc::now().to_rfc3339();

        let console_logs = if state.options.capture_console_logs {
            let logs = entry.console_snapshot();
            let start = state.recording_start_index.min(logs.len());
            logs[start..].to_vec()
        } else {
            Vec::new()
        };

        let video_path = if state.frames.is_empty() {
            // Nothing captured; report the path without writing it.
            state.output_path.clone()
        } else {
            self.encoder.encode(&state.frames, &state.output_path).await?
        };
        let video_path_str = video_path.to_string_lossy().to_string();

        let stem = output_stem(&state.output_path);
        let mut key_frame_paths = Vec::new();
        if state.options.extract_key_frames && !state.frames.is_empty() {
            for (i, idx) in
                key_frame_indices(state.frames.len(), state.options.key_frame_count)
                    .into_iter()
                    .enumerate()
            {
                let path = self
                    .recordings_dir
                    .join(format!("{}-keyframe-{}.jpg", stem, i + 1));
                tokio::fs::write(&path, &state.frames[idx]).await?;
                key_frame_paths.push(path.to_string_lossy().to_string());
            }
        }

        let page_url = entry
            .page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| "unknown".to_string());
        let page_title = entry
            .page
            .get_title()
            .await
            .ok()
            .flatten()
            .unwrap_or_default();

        let summary_path = self.recordings_dir.join(format!("{}-summary.json", stem));
        let summary = json!({
            "recording": {
                "videoPath": &video_path_str,
                "durationMs": duration_ms,
                "frameCount": state.frame_count,
                "startedAt": &state.started_at,
                "stoppedAt": stopped_at,
            },
            "consoleLogs": &console_logs,
            "keyFrames": &key_frame_paths,
            "page": { "url": page_url, "title": page_title },
        });
        tokio::fs::write(&summary_path, serde_json::to_string_pretty(&summary)?).await?;

        if let Ok(mut last) = entry.last_video.lock() {
            *last = Some(video_path_str.clone());
        }

        log::info!(
            "recording stopped on '{}': {} frames in {}ms",
            entry.name,
            state.frame_count,
            duration_ms
        );

        Ok(StopOutcome {
            video_path: video_path_str,
            duration_ms,
            frame_count: state.frame_count,
            console_logs,
            key_frame_paths,
            summary_path: summary_path.to_string_lossy().to_string(),
        })
    }
}

fn clear_slot(entry: &PageEntry) {
    if let Ok(mut slot) = entry.recording.lock() {
        *slot = None;
    }
}

/// `<sanitizedName>-<millis>` without the `.webm` extension.
fn output_stem(path: &std::path::Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("recording")
        .to_string()
}

fn clamp_options(mut options: RecordingOptions) -> RecordingOptions {
    options.quality = options.quality.min(100);
    options.every_nth_frame = options.every_nth_frame.max(1);
    options.key_frame_count = options.key_frame_count.max(1);
    options
}

fn spawn_screencast_task(
    page: Page,
    recording: Arc<Mutex<Option<RecordingState>>>,
    mut frames: chromiumoxide::listeners::EventStream<EventScreencastFrame>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = frames.next().await {
            // Ack first; the session may already be gone, which is fine.
            if let Ok(ack) = serde_json::from_value::<ScreencastFrameAckParams>(
                json!({ "sessionId": frame.session_id }),
            ) {
                let _ = page.execute(ack).await;
            }

            let decoded = match general_purpose::STANDARD.decode(AsRef::<str>::as_ref(&frame.data)) {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!("dropping undecodable screencast frame: {}", e);
                    continue;
                }
            };

            let mut done = false;
            if let Ok(mut slot) = recording.lock() {
                match slot.as_mut() {
                    Some(state) if state.is_active => {
                        state.frames.push(decoded);
                        state.frame_count += 1;
                    }
                    // Stopped or drained: ignore the frame and exit.
                    _ => done = true,
                }
            }
            if done {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_stem() {
        let path = std::path::Path::new("/tmp/rec/checkout-1712345678901.webm");
        assert_eq!(output_stem(path), "checkout-1712345678901");
    }

    #[test]
    fn test_clamp_options() {
        let options = clamp_options(RecordingOptions {
            quality: 250,
            every_nth_frame: 0,
            key_frame_count: 0,
            ..RecordingOptions::default()
        });
        assert_eq!(options.quality, 100);
        assert_eq!(options.every_nth_frame, 1);
        assert_eq!(options.key_frame_count, 1);
    }
}

//! Recording data model: options, live state, and stop results.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;

use crate::pages::console::ConsoleLogEntry;

/// Screencast options accepted by the recording start endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecordingOptions {
    pub max_width: u32,
    pub max_height: u32,
    /// JPEG quality 0-100.
    pub quality: u32,
    /// Capture every Nth compositor frame; must be >= 1.
    pub every_nth_frame: u32,
    pub capture_console_logs: bool,
    pub extract_key_frames: bool,
    /// Number of key frames to persist; must be >= 1.
    pub key_frame_count: usize,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            max_width: 1280,
            max_height: 720,
            quality: 80,
            every_nth_frame: 1,
            capture_console_logs: true,
            extract_key_frames: true,
            key_frame_count: 5,
        }
    }
}

/// Live per-page recording state.
///
/// Exists only between start and stop; the screencast task appends frames
/// while `is_active` holds. `frame_count == frames.len()` until the buffer
/// is drained for encoding.
pub struct RecordingState {
    pub is_active: bool,
    /// ISO-8601 start time, reported by the status endpoint.
    pub started_at: String,
    /// Unix millis at start; part of the output file name.
    pub started_at_millis: i64,
    /// Monotonic start for duration computation.
    pub started_instant: Instant,
    pub frame_count: u64,
    /// Ordered encoded JPEG frames as delivered by the screencast.
    pub frames: Vec<Vec<u8>>,
    pub options: RecordingOptions,
    pub output_path: PathBuf,
    /// Console-log offset captured at start; logs from here on fall inside
    /// the recording window.
    pub recording_start_index: usize,
}

/// Everything the stop endpoint reports about a finished recording.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopOutcome {
    pub video_path: String,
    pub duration_ms: u64,
    pub frame_count: u64,
    pub console_logs: Vec<ConsoleLogEntry>,
    pub key_frame_paths: Vec<String>,
    pub summary_path: String,
}

/// Replace anything outside `[A-Za-z0-9_-]` so page names are safe as file
/// name stems.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Buffer indices of the key frames for a recording of `len` frames:
/// `i * floor(len / count)` for each of the `count` frames, clamped to the
/// buffer.
pub fn key_frame_indices(len: usize, count: usize) -> Vec<usize> {
    if len == 0 || count == 0 {
        return Vec::new();
    }
    let step = std::cmp::max(1, len / count);
    (0..count)
        .map(|i| i * step)
        .filter(|&idx| idx < len)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = RecordingOptions::default();
        assert_eq!(options.max_width, 1280);
        assert_eq!(options.max_height, 720);
        assert_eq!(options.quality, 80);
        assert_eq!(options.every_nth_frame, 1);
        assert!(options.capture_console_logs);
        assert!(options.extract_key_frames);
        assert_eq!(options.key_frame_count, 5);
    }

    #[test]
    fn test_options_partial_body() {
        // Unspecified fields fall back to defaults.
        let options: RecordingOptions =
            serde_json::from_str(r#"{"quality": 50, "extractKeyFrames": false}"#).unwrap();
        assert_eq!(options.quality, 50);
        assert!(!options.extract_key_frames);
        assert_eq!(options.max_width, 1280);
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("checkout-flow"), "checkout-flow");
        assert_eq!(sanitize_name("my page #2"), "my_page__2");
        assert_eq!(sanitize_name("a/b\\c"), "a_b_c");
    }

    #[test]
    fn test_key_frame_indices_even_spread() {
        assert_eq!(key_frame_indices(10, 5), vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn test_key_frame_indices_short_buffer() {
        assert_eq!(key_frame_indices(3, 5), vec![0, 1, 2]);
        assert_eq!(key_frame_indices(0, 5), Vec::<usize>::new());
    }

    #[test]
    fn test_key_frame_indices_exact() {
        assert_eq!(key_frame_indices(5, 5), vec![0, 1, 2, 3, 4]);
    }
}

//! External video encoder invocation.
//!
//! The engine pipes the buffered JPEG frames into an `ffmpeg` subprocess to
//! produce a WebM file. When ffmpeg is not installed the raw frame sequence
//! is written to a sibling directory instead and that path stands in for the
//! video.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{Result, StudioError};

pub struct VideoEncoder {
    ffmpeg_path: String,
    fps: u32,
}

impl VideoEncoder {
    pub fn new() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            fps: 30,
        }
    }

    #[allow(dead_code)]
    pub fn with_ffmpeg_path(mut self, path: String) -> Self {
        self.ffmpeg_path = path;
        self
    }

    /// Encode `frames` into a WebM at `output`. Returns the path actually
    /// produced: `output` on success, or the raw-frames fallback directory
    /// when the encoder binary is unavailable.
    pub async fn encode(&self, frames: &[Vec<u8>], output: &Path) -> Result<PathBuf> {
        match self.spawn_ffmpeg(output) {
            Ok(child) => {
                self.drive_ffmpeg(child, frames, output).await?;
                Ok(output.to_path_buf())
            }
            Err(e) => {
                log::warn!(
                    "ffmpeg unavailable ({}), writing raw frame sequence instead",
                    e
                );
                self.write_frame_sequence(frames, output).await
            }
        }
    }

    fn spawn_ffmpeg(&self, output: &Path) -> std::io::Result<tokio::process::Child> {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-y")
            .arg("-f")
            .arg("image2pipe")
            .arg("-vcodec")
            .arg("mjpeg")
            .arg("-framerate")
            .arg(self.fps.to_string())
            .arg("-i")
            .arg("-")
            .arg("-c:v")
            .arg("libvpx-vp9")
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg(output);

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        cmd.spawn()
    }

    async fn drive_ffmpeg(
        &self,
        mut child: tokio::process::Child,
        frames: &[Vec<u8>],
        output: &Path,
    ) -> Result<()> {
        if let Some(mut stdin) = child.stdin.take() {
            for frame in frames {
                stdin
                    .write_all(frame)
                    .await
                    .map_err(|e| StudioError::Encoder(format!("Failed to feed frame: {}", e)))?;
            }
            stdin
                .shutdown()
                .await
                .map_err(|e| StudioError::Encoder(format!("Failed to close stdin: {}", e)))?;
        }

        let result = child
            .wait_with_output()
            .await
            .map_err(|e| StudioError::Encoder(format!("Failed to wait for ffmpeg: {}", e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(StudioError::Encoder(format!(
                "ffmpeg failed for {}: {}",
                output.display(),
                stderr.trim()
            )));
        }

        Ok(())
    }

    /// Encoder-absence fallback: `<stem>-frames/frame-<n>.jpg`.
    async fn write_frame_sequence(&self, frames: &[Vec<u8>], output: &Path) -> Result<PathBuf> {
        let stem = output
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("recording");
        let dir = output
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!("{}-frames", stem));

        tokio::fs::create_dir_all(&dir).await?;
        for (i, frame) in frames.iter().enumerate() {
            tokio::fs::write(dir.join(format!("frame-{}.jpg", i)), frame).await?;
        }

        Ok(dir)
    }
}

impl Default for VideoEncoder {
    fn default() -> Self {
        Self::new()
    }
}

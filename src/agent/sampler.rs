//! Perceptual frame change detection.
//!
//! Keeps one small grayscale thumbnail of the last accepted frame and
//! compares incoming frames against it. Cheap enough to run on every
//! screenshot; the loop treats the verdict as advisory.

use image::imageops::FilterType;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Square thumbnail edge in pixels.
    pub thumb_size: u32,
    /// Fraction of differing pixels above which a frame counts as changed.
    pub diff_threshold: f64,
    /// Per-pixel grayscale delta below which a pixel is considered equal;
    /// filters JPEG compression noise.
    pub pixel_delta: u8,
    /// Accept a frame unconditionally after this many consecutive skips.
    pub max_skips: u32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            thumb_size: 16,
            diff_threshold: 0.05,
            pixel_delta: 25,
            max_skips: 5,
        }
    }
}

pub struct FrameSampler {
    config: SamplerConfig,
    thumbnail: Option<Vec<u8>>,
    skips: u32,
    force_next: bool,
}

impl FrameSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self {
            config,
            thumbnail: None,
            skips: 0,
            force_next: false,
        }
    }

    /// Whether `frame` differs enough from the last accepted frame to be
    /// worth processing. Accepting a frame replaces the cached thumbnail and
    /// resets the skip counter; a rejected frame increments it.
    pub fn has_changed(&mut self, frame: &[u8]) -> Result<bool> {
        // Resample before touching any state so errors leave the sampler
        // unchanged.
        let thumb = self.thumbnail_of(frame)?;

        if self.force_next {
            self.force_next = false;
            self.accept(thumb);
            return Ok(true);
        }

        let Some(previous) = &self.thumbnail else {
            self.accept(thumb);
            return Ok(true);
        };

        let ratio = diff_ratio(previous, &thumb, self.config.pixel_delta);
        if ratio > self.config.diff_threshold {
            self.accept(thumb);
            return Ok(true);
        }

        self.skips += 1;
        if self.skips >= self.config.max_skips {
            // Heartbeat: don't starve the loop of frames forever.
            self.accept(thumb);
            return Ok(true);
        }

        Ok(false)
    }

    /// Accept the next frame unconditionally (one-shot).
    pub fn force_capture(&mut self) {
        self.force_next = true;
    }

    pub fn reset(&mut self) {
        self.thumbnail = None;
        self.skips = 0;
        self.force_next = false;
    }

    fn accept(&mut self, thumb: Vec<u8>) {
        self.thumbnail = Some(thumb);
        self.skips = 0;
    }

    fn thumbnail_of(&self, frame: &[u8]) -> Result<Vec<u8>> {
        let size = self.config.thumb_size;
        let img = image::load_from_memory(frame)?;
        let thumb = img.resize_to_fill(size, size, FilterType::Triangle).to_luma8();
        Ok(thumb.into_raw())
    }
}

/// Fraction of pixel pairs whose grayscale delta exceeds `pixel_delta`.
/// An empty thumbnail on either side counts as fully different.
fn diff_ratio(a: &[u8], b: &[u8], pixel_delta: u8) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 1.0;
    }
    let compared = a.len().min(b.len());
    let differing = a
        .iter()
        .zip(b.iter())
        .filter(|(x, y)| x.abs_diff(**y) > pixel_delta)
        .count();
    differing as f64 / compared as f64
}

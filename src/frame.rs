//! Frames and per-frame foreground masks.
//!
//! - `Frame`: an RGB pixel buffer plus its index and capture timestamp.
//! - `ForegroundMask`: binary (0 / 255) mask with the dimensions of its frame.
//!
//! A `Frame` is owned by exactly one stage at a time. Sources hand it to the
//! capture loop or the analysis pipeline by value; there is no `Clone`, so a
//! frame cannot silently end up shared between the capture and analysis
//! threads.

use anyhow::{anyhow, Result};
use image::{GrayImage, RgbImage};
use std::time::Duration;

/// Frames are always decoded to packed RGB.
pub const FRAME_CHANNELS: u32 = 3;

/// Mask value for a foreground pixel.
pub const FOREGROUND: u8 = 255;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

pub struct Frame {
    pixels: RgbImage,

    /// Position of this frame in its stream (0-based).
    pub index: u64,

    /// Capture time relative to the start of the stream. Monotonic.
    pub timestamp: Duration,
}

impl Frame {
    pub fn new(pixels: RgbImage, index: u64, timestamp: Duration) -> Self {
        Self {
            pixels,
            index,
            timestamp,
        }
    }

    /// Build a frame from packed RGB bytes.
    pub fn from_rgb(
        data: Vec<u8>,
        width: u32,
        height: u32,
        index: u64,
        timestamp: Duration,
    ) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(FRAME_CHANNELS as usize))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        let pixels = RgbImage::from_raw(width, height, data)
            .ok_or_else(|| anyhow!("failed to wrap {}x{} RGB buffer", width, height))?;
        Ok(Self::new(pixels, index, timestamp))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn channels(&self) -> u32 {
        FRAME_CHANNELS
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    /// Mutable access for annotation. Dimensions cannot change through this.
    pub fn pixels_mut(&mut self) -> &mut RgbImage {
        &mut self.pixels
    }

    /// Luma plane the background model works on.
    pub fn luma(&self) -> GrayImage {
        image::imageops::grayscale(&self.pixels)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("timestamp", &self.timestamp)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// Timestamp of frame `index` in a stream running at `fps`.
pub fn frame_timestamp(index: u64, fps: f64) -> Duration {
    if fps <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(index as f64 / fps)
}

/// Nominal spacing between frames at `fps`.
pub fn frame_interval(fps: f64) -> Duration {
    if fps <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(1.0 / fps)
}

// ----------------------------------------------------------------------------
// ForegroundMask
// ----------------------------------------------------------------------------

/// Binary foreground mask. Pixels are either 0 or `FOREGROUND`.
#[derive(Clone, Debug)]
pub struct ForegroundMask {
    mask: GrayImage,
}

impl ForegroundMask {
    pub(crate) fn new(mask: GrayImage) -> Self {
        Self { mask }
    }

    pub fn width(&self) -> u32 {
        self.mask.width()
    }

    pub fn height(&self) -> u32 {
        self.mask.height()
    }

    pub fn is_foreground(&self, x: u32, y: u32) -> bool {
        x < self.width() && y < self.height() && self.mask.get_pixel(x, y).0[0] != 0
    }

    pub fn foreground_pixels(&self) -> usize {
        self.mask.as_raw().iter().filter(|v| **v != 0).count()
    }

    /// True when this mask was derived from a frame of the same size.
    pub fn matches(&self, frame: &Frame) -> bool {
        self.width() == frame.width() && self.height() == frame.height()
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn rejects_short_buffers() {
        let err = Frame::from_rgb(vec![0; 10], 4, 4, 0, Duration::ZERO).unwrap_err();
        assert!(err.to_string().contains("expected 48 RGB bytes"));
    }

    #[test]
    fn luma_of_gray_is_identity() {
        let pixels = RgbImage::from_pixel(3, 2, Rgb([200, 200, 200]));
        let frame = Frame::new(pixels, 0, Duration::ZERO);
        assert!(frame.luma().pixels().all(|p| p.0[0] == 200));
    }

    #[test]
    fn timestamps_follow_frame_rate() {
        assert_eq!(frame_timestamp(0, 25.0), Duration::ZERO);
        assert_eq!(frame_timestamp(50, 25.0), Duration::from_secs(2));
        assert_eq!(frame_interval(0.0), Duration::ZERO);
    }
}

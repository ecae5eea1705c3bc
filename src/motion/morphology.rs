//! Structuring elements for cleaning foreground masks.
//!
//! The operators themselves are imageproc's grayscale morphology, which on a
//! 0/255 mask behaves as binary morphology. Pixels outside the image do not
//! take part.

use anyhow::{bail, Result};
use image::{GrayImage, Luma};
use imageproc::morphology::{grayscale_close, grayscale_open, Mask};
use serde::Deserialize;

use crate::frame::FOREGROUND;

/// Largest supported kernel side; imageproc anchors masks with `u8` offsets.
pub const MAX_KERNEL_SIZE: u32 = 255;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelShape {
    Ellipse,
    Rect,
    Cross,
}

/// A kernel anchored at its centre.
pub struct StructuringElement {
    kernel: GrayImage,
    mask: Mask,
}

impl StructuringElement {
    pub fn new(shape: KernelShape, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!(
                "structuring element must be at least 1x1 (got {}x{})",
                width,
                height
            );
        }
        if width > MAX_KERNEL_SIZE || height > MAX_KERNEL_SIZE {
            bail!(
                "structuring element {}x{} exceeds {}x{}",
                width,
                height,
                MAX_KERNEL_SIZE,
                MAX_KERNEL_SIZE
            );
        }
        let shape = if width == 1 && height == 1 {
            KernelShape::Rect
        } else {
            shape
        };

        let cx = (width / 2) as i32;
        let cy = (height / 2) as i32;
        let mut kernel = GrayImage::new(width, height);
        for row in 0..height as i32 {
            let (start, end) = match shape {
                KernelShape::Rect => (0, width as i32),
                KernelShape::Cross if row == cy => (0, width as i32),
                KernelShape::Cross => (cx, cx + 1),
                KernelShape::Ellipse => {
                    // Row half-widths of the inscribed ellipse.
                    let dy = row - cy;
                    let r = cy as f64;
                    let inv_r2 = if cy == 0 { 0.0 } else { 1.0 / (r * r) };
                    let dx = (cx as f64 * ((r * r - (dy * dy) as f64) * inv_r2).max(0.0).sqrt())
                        .round() as i32;
                    ((cx - dx).max(0), (cx + dx + 1).min(width as i32))
                }
            };
            for col in start..end {
                kernel.put_pixel(col as u32, row as u32, Luma([FOREGROUND]));
            }
        }
        let mask = Mask::from_image(&kernel, cx as u8, cy as u8);
        Ok(Self { kernel, mask })
    }

    pub fn ellipse(size: u32) -> Result<Self> {
        Self::new(KernelShape::Ellipse, size, size)
    }

    pub fn width(&self) -> u32 {
        self.kernel.width()
    }

    pub fn height(&self) -> u32 {
        self.kernel.height()
    }

    /// Number of active kernel cells.
    pub fn len(&self) -> usize {
        self.kernel.pixels().filter(|p| p.0[0] != 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the cell at `(dx, dy)` from the anchor is active.
    pub fn contains(&self, dx: i32, dy: i32) -> bool {
        let x = (self.width() / 2) as i32 + dx;
        let y = (self.height() / 2) as i32 + dy;
        x >= 0
            && y >= 0
            && (x as u32) < self.width()
            && (y as u32) < self.height()
            && self.kernel.get_pixel(x as u32, y as u32).0[0] != 0
    }

    /// Close (fill holes) and then open (drop specks) a foreground mask.
    pub fn clean(&self, mask: &GrayImage) -> GrayImage {
        grayscale_open(&grayscale_close(mask, &self.mask), &self.mask)
    }
}

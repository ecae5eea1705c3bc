//! Motion detection: background subtraction, morphological cleanup and
//! contour-to-box extraction.
//!
//! One `MotionDetector` per camera stream. The detector owns the stream's
//! `BackgroundModel`, so `detect` takes `&mut self` and frames must be fed in
//! capture order.

pub mod background;
pub mod morphology;

use anyhow::{anyhow, Result};
use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use serde::Deserialize;

use crate::frame::{ForegroundMask, Frame};
use crate::geometry::BoundingBox;

pub use background::{BackgroundModel, BackgroundParams};
pub use morphology::{KernelShape, StructuringElement};

pub const DEFAULT_MIN_AREA: f64 = 500.0;
pub const DEFAULT_KERNEL_SIZE: u32 = 5;
pub const DEFAULT_NMS_OVERLAP: f32 = 0.3;

#[derive(Clone, Debug, PartialEq)]
pub struct MotionConfig {
    pub background: BackgroundParams,
    pub kernel_shape: KernelShape,
    pub kernel_size: u32,
    /// Contours with an area at or below this do not produce boxes.
    pub min_area: f64,
    /// Overlap threshold used when the capture loop suppresses motion boxes.
    pub nms_overlap: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            background: BackgroundParams::default(),
            kernel_shape: KernelShape::Ellipse,
            kernel_size: DEFAULT_KERNEL_SIZE,
            min_area: DEFAULT_MIN_AREA,
            nms_overlap: DEFAULT_NMS_OVERLAP,
        }
    }
}

/// Optional overrides as they appear in the `[motion]` config section.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MotionFileConfig {
    pub history: Option<u32>,
    pub var_threshold: Option<f32>,
    pub kernel_shape: Option<KernelShape>,
    pub kernel_size: Option<u32>,
    pub min_area: Option<f64>,
    pub nms_overlap: Option<f32>,
}

impl MotionFileConfig {
    pub fn into_config(self) -> MotionConfig {
        let defaults = MotionConfig::default();
        MotionConfig {
            background: BackgroundParams {
                history: self.history.unwrap_or(defaults.background.history),
                var_threshold: self
                    .var_threshold
                    .unwrap_or(defaults.background.var_threshold),
                ..defaults.background
            },
            kernel_shape: self.kernel_shape.unwrap_or(defaults.kernel_shape),
            kernel_size: self.kernel_size.unwrap_or(defaults.kernel_size),
            min_area: self.min_area.unwrap_or(defaults.min_area),
            nms_overlap: self.nms_overlap.unwrap_or(defaults.nms_overlap),
        }
    }
}

/// Result of one `detect` call.
#[derive(Debug)]
pub struct MotionReport {
    /// True whenever the cleaned mask contains at least one contour.
    pub has_motion: bool,
    /// Raw background-subtraction mask, before morphology.
    pub mask: ForegroundMask,
    /// Boxes of contours larger than `min_area`, unsuppressed.
    pub boxes: Vec<BoundingBox>,
}

pub struct MotionDetector {
    model: BackgroundModel,
    element: StructuringElement,
    min_area: f64,
}

impl MotionDetector {
    pub fn new(config: &MotionConfig) -> Result<Self> {
        if config.kernel_size == 0 {
            return Err(anyhow!("motion.kernel_size must be > 0"));
        }
        if !(config.min_area >= 0.0) {
            return Err(anyhow!("motion.min_area must be >= 0"));
        }
        let element =
            StructuringElement::new(config.kernel_shape, config.kernel_size, config.kernel_size)?;
        Ok(Self {
            model: BackgroundModel::new(config.background),
            element,
            min_area: config.min_area,
        })
    }

    pub fn detect(&mut self, frame: &Frame) -> MotionReport {
        let raw = self.model.apply(&frame.luma());
        let cleaned = self.element.clean(&raw);
        let (has_motion, boxes) = extract_boxes(&cleaned, self.min_area);
        if has_motion {
            log::trace!(
                "frame {}: motion with {} box(es) over {:.0}",
                frame.index,
                boxes.len(),
                self.min_area
            );
        }
        MotionReport {
            has_motion,
            mask: ForegroundMask::new(raw),
            boxes,
        }
    }

    /// Drop the background model, e.g. after the camera session restarts.
    pub fn reset(&mut self) {
        self.model.reset();
    }

    pub fn frames_seen(&self) -> u64 {
        self.model.frames_seen()
    }
}

/// External contours of `mask`; returns whether any exist and the boxes of
/// those whose area exceeds `min_area`.
fn extract_boxes(mask: &GrayImage, min_area: f64) -> (bool, Vec<BoundingBox>) {
    let contours = find_contours::<i32>(mask);
    let mut any = false;
    let mut boxes = Vec::new();
    for contour in contours
        .iter()
        .filter(|c| c.parent.is_none() && c.border_type == BorderType::Outer)
    {
        if contour.points.is_empty() {
            continue;
        }
        any = true;
        if polygon_area(&contour.points) <= min_area {
            continue;
        }
        let (mut x1, mut y1) = (i32::MAX, i32::MAX);
        let (mut x2, mut y2) = (i32::MIN, i32::MIN);
        for p in &contour.points {
            x1 = x1.min(p.x);
            y1 = y1.min(p.y);
            x2 = x2.max(p.x);
            y2 = y2.max(p.y);
        }
        boxes.push(BoundingBox::new(x1, y1, x2 + 1, y2 + 1));
    }
    (any, boxes)
}

/// Shoelace area of the polygon through the contour's pixel centres.
fn polygon_area(points: &[imageproc::point::Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    twice.abs() as f64 / 2.0
}

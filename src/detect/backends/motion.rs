use anyhow::Result;

use crate::detect::backend::ObjectDetector;
use crate::detect::result::Detection;
use crate::frame::Frame;
use crate::motion::{MotionConfig, MotionDetector};
use crate::nms;

/// Reference backend: every suppressed motion region is reported as one
/// object with a fixed label and confidence.
///
/// Useful where no model is deployed and in tests; it cannot tell a person
/// from a swaying branch.
pub struct MotionBackend {
    detector: MotionDetector,
    nms_overlap: f32,
    label: String,
    confidence: f32,
}

impl MotionBackend {
    pub fn new(config: &MotionConfig, label: impl Into<String>, confidence: f32) -> Result<Self> {
        Ok(Self {
            detector: MotionDetector::new(config)?,
            nms_overlap: config.nms_overlap,
            label: label.into(),
            confidence,
        })
    }
}

impl ObjectDetector for MotionBackend {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let report = self.detector.detect(frame);
        Ok(nms::suppress_boxes(report.boxes, self.nms_overlap)
            .into_iter()
            .map(|bbox| {
                let bbox = bbox
                    .with_score(self.confidence)
                    .with_label(self.label.clone());
                Detection::new(bbox, self.confidence, self.label.clone())
            })
            .collect())
    }

    fn reset(&mut self) {
        self.detector.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::time::Duration;

    fn frame(index: u64, square: bool) -> Frame {
        let mut pixels = RgbImage::from_pixel(80, 60, Rgb([20, 20, 20]));
        if square {
            for y in 10..40 {
                for x in 20..50 {
                    pixels.put_pixel(x, y, Rgb([240, 240, 240]));
                }
            }
        }
        Frame::new(pixels, index, Duration::ZERO)
    }

    #[test]
    fn motion_backend_reports_labelled_regions() -> Result<()> {
        let mut backend = MotionBackend::new(&MotionConfig::default(), "person", 0.85)?;

        assert!(backend.detect(&frame(0, false))?.is_empty());
        assert!(backend.detect(&frame(1, false))?.is_empty());

        let detections = backend.detect(&frame(2, true))?;
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, "person");
        assert_eq!(detections[0].confidence, 0.85);

        backend.reset();
        assert!(backend.detect(&frame(3, true))?.is_empty());
        Ok(())
    }
}

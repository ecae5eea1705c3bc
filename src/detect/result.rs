use crate::geometry::BoundingBox;

/// One detected object in one frame, in frame pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub label: String,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32, label: impl Into<String>) -> Self {
        Self {
            bbox,
            confidence,
            label: label.into(),
        }
    }

    /// Confidence rounded up to hundredths, the precision thresholds are
    /// expressed in. A tiny epsilon keeps binary noise from bumping exact
    /// hundredths (0.63 stays 0.63).
    pub fn rounded_confidence(&self) -> f32 {
        let scaled = self.confidence as f64 * 100.0;
        ((scaled - 1e-4).ceil() / 100.0) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(confidence: f32) -> Detection {
        Detection::new(BoundingBox::new(0, 0, 1, 1), confidence, "person")
    }

    #[test]
    fn confidence_rounds_up_to_hundredths() {
        assert_eq!(det(0.621).rounded_confidence(), 0.63);
        assert_eq!(det(0.63).rounded_confidence(), 0.63);
        assert_eq!(det(0.6301).rounded_confidence(), 0.64);
        assert_eq!(det(0.62).rounded_confidence(), 0.62);
    }
}

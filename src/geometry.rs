use serde::Serialize;

/// Integer pixel rectangle `(x1, y1)`..`(x2, y2)` with an optional score and
/// class label.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub score: Option<f32>,
    pub label: Option<String>,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            score: None,
            label: None,
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn width(&self) -> i32 {
        (self.x2 - self.x1).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.y2 - self.y1).max(0)
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    /// Intersection over union, 0.0 for disjoint or empty boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0) as i64;
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0) as i64;
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0 {
            0.0
        } else {
            inter as f32 / union as f32
        }
    }

    /// True when `other` lies entirely inside this box.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        self.x1 <= other.x1 && self.y1 <= other.y1 && self.x2 >= other.x2 && self.y2 >= other.y2
    }

    /// Clip to a `width` x `height` image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let max_x = width as i32;
        let max_y = height as i32;
        Self {
            x1: self.x1.clamp(0, max_x),
            y1: self.y1.clamp(0, max_y),
            x2: self.x2.clamp(0, max_x),
            y2: self.y2.clamp(0, max_y),
            score: self.score,
            label: self.label.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_half_overlap() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(5, 0, 15, 10);
        let iou = a.iou(&b);
        assert!((iou - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&BoundingBox::new(20, 20, 30, 30)), 0.0);
    }

    #[test]
    fn clamp_keeps_metadata() {
        let b = BoundingBox::new(-5, -5, 50, 50)
            .with_score(0.9)
            .with_label("person")
            .clamp_to(40, 30);
        assert_eq!((b.x1, b.y1, b.x2, b.y2), (0, 0, 40, 30));
        assert_eq!(b.label.as_deref(), Some("person"));
    }
}

//! Non-max suppression for motion regions.
//!
//! Overlap is measured as intersection over the *candidate's* area (not IoU),
//! so a small box swallowed by a larger kept box is always suppressed.

use crate::geometry::BoundingBox;

/// Return the indices of `boxes` that survive suppression.
///
/// Boxes are visited from the greatest bottom edge (`y2`) down. Each visited
/// box is kept, and every remaining box whose overlap with it exceeds
/// `overlap_threshold` is dropped.
pub fn suppress(boxes: &[BoundingBox], overlap_threshold: f32) -> Vec<usize> {
    if boxes.is_empty() {
        return Vec::new();
    }

    // Inclusive pixel extents.
    let areas: Vec<f64> = boxes
        .iter()
        .map(|b| (b.x2 - b.x1 + 1) as f64 * (b.y2 - b.y1 + 1) as f64)
        .collect();

    let mut order: Vec<usize> = (0..boxes.len()).collect();
    order.sort_by_key(|&i| boxes[i].y2);

    let threshold = overlap_threshold as f64;
    let mut keep = Vec::new();
    while let Some(last) = order.pop() {
        keep.push(last);
        let kept = &boxes[last];
        order.retain(|&i| {
            let candidate = &boxes[i];
            if areas[i] <= 0.0 {
                return true;
            }
            let w = (kept.x2.min(candidate.x2) - kept.x1.max(candidate.x1) + 1).max(0);
            let h = (kept.y2.min(candidate.y2) - kept.y1.max(candidate.y1) + 1).max(0);
            let overlap = (w as f64 * h as f64) / areas[i];
            overlap <= threshold
        });
    }
    keep
}

/// Convenience wrapper returning the surviving boxes themselves.
pub fn suppress_boxes(boxes: Vec<BoundingBox>, overlap_threshold: f32) -> Vec<BoundingBox> {
    let keep = suppress(&boxes, overlap_threshold);
    let mut slots: Vec<Option<BoundingBox>> = boxes.into_iter().map(Some).collect();
    keep.into_iter().filter_map(|i| slots[i].take()).collect()
}

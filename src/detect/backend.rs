use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Object detector consumed by the analysis pipeline.
///
/// Detectors see one frame at a time, in clip order. Implementations may keep
/// per-clip state (e.g. a background model) and must drop it in `reset`.
pub trait ObjectDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Forget per-clip state. Called before each clip.
    fn reset(&mut self) {}

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<D: ObjectDetector + ?Sized> ObjectDetector for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        (**self).detect(frame)
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}

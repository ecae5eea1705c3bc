//! Object detection for clip analysis.

mod backend;
pub mod backends;
mod result;

use anyhow::Result;
#[cfg(not(feature = "backend-tract"))]
use anyhow::bail;
use serde::Deserialize;
use std::path::PathBuf;

use crate::motion::MotionConfig;

pub use backend::ObjectDetector;
pub use backends::MotionBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::Detection;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    #[default]
    Motion,
    Tract,
}

#[derive(Clone, Debug)]
pub struct DetectorConfig {
    pub kind: DetectorKind,
    /// Label reported by the motion backend.
    pub motion_label: String,
    pub motion_confidence: f32,
    pub motion: MotionConfig,
    /// ONNX model for the tract backend.
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            kind: DetectorKind::Motion,
            motion_label: "person".to_string(),
            motion_confidence: 0.85,
            motion: MotionConfig::default(),
            model_path: None,
            input_size: 640,
        }
    }
}

/// Build the configured detector and warm it up.
pub fn detector_from_config(config: &DetectorConfig) -> Result<Box<dyn ObjectDetector>> {
    let mut detector: Box<dyn ObjectDetector> = match config.kind {
        DetectorKind::Motion => Box::new(MotionBackend::new(
            &config.motion,
            config.motion_label.clone(),
            config.motion_confidence,
        )?),
        #[cfg(feature = "backend-tract")]
        DetectorKind::Tract => {
            let path = config
                .model_path
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("tract detector requires a model_path"))?;
            Box::new(TractBackend::new(path, config.input_size)?)
        }
        #[cfg(not(feature = "backend-tract"))]
        DetectorKind::Tract => bail!("tract detector requires the backend-tract feature"),
    };
    detector.warm_up()?;
    log::info!("detector backend: {}", detector.name());
    Ok(detector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_motion_detector_by_default() -> Result<()> {
        let detector = detector_from_config(&DetectorConfig::default())?;
        assert_eq!(detector.name(), "motion");
        Ok(())
    }

    #[cfg(not(feature = "backend-tract"))]
    #[test]
    fn tract_requires_feature() {
        let config = DetectorConfig {
            kind: DetectorKind::Tract,
            ..DetectorConfig::default()
        };
        assert!(detector_from_config(&config).is_err());
    }
}

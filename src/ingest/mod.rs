//! Frame ingestion sources.
//!
//! This module provides different sources for frames:
//! - Synthetic scenes (`stub://`) for tests and demos
//! - Recorded `.y4m` clips (`file://` or a plain path)
//! - Anything ffmpeg can open (`/dev/video*`, `rtsp://`, `http://`, video files)
//!
//! Every source hands out owned `Frame`s with a monotonically increasing index
//! and a timestamp relative to the start of the stream. End of stream is
//! `Ok(None)`; a broken source is `Err`.

pub mod ffmpeg;
pub mod file;
pub mod synthetic;

use anyhow::{bail, Result};

use crate::frame::Frame;

pub use ffmpeg::FfmpegSource;
pub use file::ClipFileSource;
pub use synthetic::{MovingObject, SyntheticScene, SyntheticSource};

/// A pull-based frame producer owned by exactly one loop.
pub trait FrameSource: Send {
    /// Open the underlying device, file or process.
    fn connect(&mut self) -> Result<()>;

    /// Next frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Nominal frames per second.
    fn frame_rate(&self) -> f64;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;

    /// Release the capture handle. Safe to call more than once.
    fn close(&mut self);
}

/// Statistics for a frame source.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub uri: String,
}

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// `stub://...`, `file://...`, a `.y4m` path, a device node or a URL.
    pub uri: String,
    /// Target frame rate. Live sources are resampled to it.
    pub target_fps: f64,
    pub width: u32,
    pub height: u32,
    /// ffmpeg binary used for live sources.
    pub ffmpeg_bin: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            uri: "stub://scene".to_string(),
            target_fps: 30.0,
            width: 640,
            height: 480,
            ffmpeg_bin: "ffmpeg".to_string(),
        }
    }
}

/// Camera source selected from the configured URI.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticSource),
    File(ClipFileSource),
    Ffmpeg(FfmpegSource),
}

impl CameraSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        if config.uri.trim().is_empty() {
            bail!("camera source URI is empty");
        }
        if !(config.target_fps > 0.0) {
            bail!("camera target_fps must be > 0");
        }
        let backend = if config.uri.starts_with("stub://") {
            CameraBackend::Synthetic(SyntheticSource::from_config(&config)?)
        } else if let Some(path) = file::clip_path(&config.uri) {
            CameraBackend::File(ClipFileSource::new(path))
        } else {
            CameraBackend::Ffmpeg(FfmpegSource::new(config))
        };
        Ok(Self { backend })
    }

    fn inner(&self) -> &dyn FrameSource {
        match &self.backend {
            CameraBackend::Synthetic(source) => source,
            CameraBackend::File(source) => source,
            CameraBackend::Ffmpeg(source) => source,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn FrameSource {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source,
            CameraBackend::File(source) => source,
            CameraBackend::Ffmpeg(source) => source,
        }
    }

    pub fn kind(&self) -> &'static str {
        match &self.backend {
            CameraBackend::Synthetic(_) => "synthetic",
            CameraBackend::File(_) => "file",
            CameraBackend::Ffmpeg(_) => "ffmpeg",
        }
    }
}

impl FrameSource for CameraSource {
    fn connect(&mut self) -> Result<()> {
        self.inner_mut().connect()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.inner_mut().next_frame()
    }

    fn frame_rate(&self) -> f64 {
        self.inner().frame_rate()
    }

    fn is_healthy(&self) -> bool {
        self.inner().is_healthy()
    }

    fn stats(&self) -> SourceStats {
        self.inner().stats()
    }

    fn close(&mut self) {
        self.inner_mut().close()
    }
}

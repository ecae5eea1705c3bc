//! Recorded clip source.
//!
//! Replays a `.y4m` clip frame by frame. Timestamps come from the clip's frame
//! rate, so replay speed is up to the caller's ticker.

use anyhow::{anyhow, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;
use crate::video::{Y4mReader, CLIP_EXTENSION};

/// Local clip path for `file://` URIs and bare `.y4m` paths.
pub fn clip_path(uri: &str) -> Option<PathBuf> {
    if let Some(path) = uri.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    if uri.contains("://") {
        return None;
    }
    let path = Path::new(uri);
    let is_clip = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case(CLIP_EXTENSION))
        .unwrap_or(false);
    is_clip.then(|| path.to_path_buf())
}

pub struct ClipFileSource {
    path: PathBuf,
    reader: Option<Y4mReader<BufReader<File>>>,
    frames: u64,
    last_error: Option<String>,
}

impl ClipFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reader: None,
            frames: 0,
            last_error: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frame size once connected.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.reader.as_ref().map(|r| (r.width(), r.height()))
    }
}

impl FrameSource for ClipFileSource {
    fn connect(&mut self) -> Result<()> {
        let reader = Y4mReader::open(&self.path)?;
        log::info!(
            "ClipFileSource: opened {} ({}x{} @ {:.2} fps)",
            self.path.display(),
            reader.width(),
            reader.height(),
            reader.fps()
        );
        self.reader = Some(reader);
        self.frames = 0;
        self.last_error = None;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| anyhow!("clip {} is not open", self.path.display()))?;
        match reader.read_frame() {
            Ok(Some(frame)) => {
                self.frames += 1;
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn frame_rate(&self) -> f64 {
        self.reader.as_ref().map(|r| r.fps()).unwrap_or(0.0)
    }

    fn is_healthy(&self) -> bool {
        self.reader.is_some() && self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames,
            uri: self.path.display().to_string(),
        }
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::{FrameRate, Y4mWriter};
    use image::{Rgb, RgbImage};
    use std::time::Duration;

    #[test]
    fn clip_path_detection() {
        assert_eq!(clip_path("file:///tmp/a.mp4"), Some(PathBuf::from("/tmp/a.mp4")));
        assert_eq!(clip_path("clips/b.Y4M"), Some(PathBuf::from("clips/b.Y4M")));
        assert_eq!(clip_path("rtsp://cam/stream"), None);
        assert_eq!(clip_path("/dev/video0"), None);
    }

    #[test]
    fn replays_written_clip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("clip.y4m");
        let mut writer = Y4mWriter::create(&path, 4, 4, FrameRate::new(5, 1)?)?;
        for i in 0..3 {
            let frame = Frame::new(
                RgbImage::from_pixel(4, 4, Rgb([90, 90, 90])),
                i,
                Duration::ZERO,
            );
            writer.write_frame(&frame)?;
        }
        writer.finish()?;

        let mut source = ClipFileSource::new(&path);
        assert!(!source.is_healthy());
        source.connect()?;
        assert_eq!(source.frame_rate(), 5.0);
        assert_eq!(source.dimensions(), Some((4, 4)));
        let mut count = 0;
        while source.next_frame()?.is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
        assert_eq!(source.stats().frames_captured, 3);
        source.close();
        assert!(source.next_frame().is_err());
        Ok(())
    }

    #[test]
    fn missing_clip_fails_to_connect() {
        let mut source = ClipFileSource::new("/nonexistent/clip.y4m");
        assert!(source.connect().is_err());
    }
}

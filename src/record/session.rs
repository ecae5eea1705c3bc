//! One in-flight clip: a writer on a staging file plus its bookkeeping.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::frame::Frame;
use crate::video::{FrameRate, Y4mWriter};

pub struct RecordingSession {
    writer: Y4mWriter,
    staging_path: PathBuf,
    file_name: String,
    start: Duration,
    frame_interval: Duration,
    frames_written: u64,
    elapsed: Duration,
}

impl RecordingSession {
    /// Create the staging file for a clip whose first frame is `first`.
    pub fn open(
        staging_dir: &Path,
        file_name: String,
        first: &Frame,
        rate: FrameRate,
    ) -> Result<Self> {
        fs::create_dir_all(staging_dir).with_context(|| {
            format!("failed to create staging dir {}", staging_dir.display())
        })?;
        let staging_path = staging_dir.join(&file_name);
        let writer = Y4mWriter::create(&staging_path, first.width(), first.height(), rate)?;
        Ok(Self {
            writer,
            staging_path,
            file_name,
            start: first.timestamp,
            frame_interval: Duration::from_secs_f64(rate.den as f64 / rate.num as f64),
            frames_written: 0,
            elapsed: Duration::ZERO,
        })
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Time covered by the frames written so far (last frame included).
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn write(&mut self, frame: &Frame) -> Result<()> {
        self.writer.write_frame(frame)?;
        self.frames_written += 1;
        self.elapsed = frame.timestamp.saturating_sub(self.start) + self.frame_interval;
        Ok(())
    }

    /// Flush and sync the clip, then move it into `clips_dir`.
    ///
    /// A same-filesystem rename is atomic. Across filesystems the clip is
    /// copied under a hidden name inside `clips_dir` and renamed from there,
    /// so the directory only ever shows complete clips under their real name.
    pub fn finalize(self, clips_dir: &Path) -> Result<PathBuf> {
        let file = self.writer.finish()?;
        file.sync_all()
            .with_context(|| format!("failed to sync {}", self.staging_path.display()))?;
        drop(file);

        fs::create_dir_all(clips_dir)
            .with_context(|| format!("failed to create clips dir {}", clips_dir.display()))?;
        let target = unique_path(clips_dir, &self.file_name);
        match fs::rename(&self.staging_path, &target) {
            Ok(()) => Ok(target),
            Err(err) => {
                log::debug!(
                    "rename {} -> {} failed ({err}); copying",
                    self.staging_path.display(),
                    target.display()
                );
                copy_into_place(&self.staging_path, &target)?;
                fs::remove_file(&self.staging_path).with_context(|| {
                    format!("failed to remove staged clip {}", self.staging_path.display())
                })?;
                Ok(target)
            }
        }
    }

    /// Close the writer and delete the staging file.
    pub fn discard(self) -> PathBuf {
        let Self {
            writer,
            staging_path,
            ..
        } = self;
        drop(writer);
        match fs::remove_file(&staging_path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => log::warn!(
                "failed to remove partial clip {}: {err}",
                staging_path.display()
            ),
        }
        staging_path
    }
}

fn copy_into_place(source: &Path, target: &Path) -> Result<()> {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let hidden = target.with_file_name(format!(".{name}.partial"));
    let result = fs::copy(source, &hidden)
        .and_then(|_| File::open(&hidden)?.sync_all())
        .and_then(|_| fs::rename(&hidden, target));
    if let Err(err) = result {
        let _ = fs::remove_file(&hidden);
        return Err(err).with_context(|| {
            format!("failed to move {} to {}", source.display(), target.display())
        });
    }
    Ok(())
}

/// `dir/name`, or `dir/<stem>_<n>.<ext>` if that already exists.
pub(crate) fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{stem}_{n}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn frame(index: u64) -> Frame {
        Frame::new(
            RgbImage::from_pixel(4, 4, Rgb([10, 20, 30])),
            index,
            Duration::from_millis(index * 100),
        )
    }

    #[test]
    fn elapsed_includes_last_frame() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let rate = FrameRate::new(10, 1)?;
        let mut session = RecordingSession::open(dir.path(), "a.y4m".into(), &frame(5), rate)?;
        session.write(&frame(5))?;
        assert_eq!(session.elapsed(), Duration::from_millis(100));
        session.write(&frame(6))?;
        assert_eq!(session.elapsed(), Duration::from_millis(200));
        assert_eq!(session.frames_written(), 2);
        Ok(())
    }

    #[test]
    fn finalize_moves_into_clips_dir() -> Result<()> {
        let staging = tempfile::tempdir()?;
        let clips = tempfile::tempdir()?;
        let rate = FrameRate::new(10, 1)?;
        let mut session = RecordingSession::open(staging.path(), "a.y4m".into(), &frame(0), rate)?;
        session.write(&frame(0))?;
        let staged = session.staging_path().to_path_buf();
        let path = session.finalize(clips.path())?;
        assert_eq!(path, clips.path().join("a.y4m"));
        assert!(path.exists());
        assert!(!staged.exists());
        Ok(())
    }

    #[test]
    fn discard_removes_staging_file() -> Result<()> {
        let staging = tempfile::tempdir()?;
        let rate = FrameRate::new(10, 1)?;
        let session = RecordingSession::open(staging.path(), "b.y4m".into(), &frame(0), rate)?;
        let path = session.discard();
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn unique_path_appends_counter() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("c.y4m"), b"x")?;
        fs::write(dir.path().join("c_1.y4m"), b"x")?;
        assert_eq!(unique_path(dir.path(), "c.y4m"), dir.path().join("c_2.y4m"));
        assert_eq!(unique_path(dir.path(), "d.y4m"), dir.path().join("d.y4m"));
        Ok(())
    }
}

//! Debounced motion-triggered recording.
//!
//! `RecordingController` consumes one motion verdict per frame, in frame
//! order, and owns at most one `RecordingSession` at a time.
//!
//! ```text
//! Idle --motion--> Accumulating(1) --motion--> ... Accumulating(n)
//!   ^                   |  no motion                 | n > debounce_frames
//!   +-------------------+                            v
//!   +------------- max_duration reached ------- Recording
//! ```
//!
//! Clips are written to a staging dir and moved into the clips dir only once
//! complete, so anything appearing in the clips dir is safe to analyze.

pub mod session;

use chrono::Local;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::frame::Frame;
use crate::video::{FrameRate, CLIP_EXTENSION};

pub use session::RecordingSession;

pub const DEFAULT_DEBOUNCE_FRAMES: u32 = 30;
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(10);

/// What to do with an in-flight clip when detection is switched off.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopPolicy {
    #[default]
    Discard,
    Finalize,
}

#[derive(Clone, Debug)]
pub struct RecorderConfig {
    pub stream_id: String,
    /// Recording starts once the consecutive motion count exceeds this.
    pub debounce_frames: u32,
    pub max_duration: Duration,
    pub staging_dir: PathBuf,
    pub clips_dir: PathBuf,
    pub stop_policy: StopPolicy,
    /// Frame rate written into clip headers.
    pub fps: f64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            stream_id: "cam0".to_string(),
            debounce_frames: DEFAULT_DEBOUNCE_FRAMES,
            max_duration: DEFAULT_MAX_DURATION,
            staging_dir: PathBuf::from("data/staging"),
            clips_dir: PathBuf::from("data/clips"),
            stop_policy: StopPolicy::Discard,
            fps: 30.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderPhase {
    Idle,
    Accumulating,
    Recording,
}

/// Outcome of feeding one frame (or a stop) to the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecorderEvent {
    Idle,
    Accumulating(u32),
    /// A session opened; the path is the staging file.
    Started(PathBuf),
    Recording,
    /// The clip was moved into the clips dir at this path.
    Finalized(PathBuf),
    /// The partial clip at this staging path was deleted.
    Discarded(PathBuf),
    StartFailed,
    WriteFailed,
}

enum State {
    Idle,
    Accumulating(u32),
    Recording(RecordingSession),
}

pub struct RecordingController {
    config: RecorderConfig,
    rate: Option<FrameRate>,
    state: State,
    clips_finalized: u64,
}

impl RecordingController {
    pub fn new(config: RecorderConfig) -> Self {
        let rate = match FrameRate::from_fps(config.fps) {
            Ok(rate) => Some(rate),
            Err(err) => {
                log::error!("recorder {}: {err:#}; recording disabled", config.stream_id);
                None
            }
        };
        Self {
            config,
            rate,
            state: State::Idle,
            clips_finalized: 0,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn phase(&self) -> RecorderPhase {
        match self.state {
            State::Idle => RecorderPhase::Idle,
            State::Accumulating(_) => RecorderPhase::Accumulating,
            State::Recording(_) => RecorderPhase::Recording,
        }
    }

    /// Consecutive motion-positive frames counted toward the debounce.
    pub fn counter(&self) -> u32 {
        match self.state {
            State::Accumulating(n) => n,
            _ => 0,
        }
    }

    pub fn clips_finalized(&self) -> u64 {
        self.clips_finalized
    }

    /// Staging path of the open session, if any.
    pub fn active_clip(&self) -> Option<&Path> {
        match &self.state {
            State::Recording(session) => Some(session.staging_path()),
            _ => None,
        }
    }

    /// Advance the state machine by one frame.
    pub fn on_frame(&mut self, frame: &Frame, motion: bool) -> RecorderEvent {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle if !motion => RecorderEvent::Idle,
            State::Idle => self.accumulate(1, frame),
            State::Accumulating(_) if !motion => {
                log::trace!("recorder {}: motion dropped out", self.config.stream_id);
                RecorderEvent::Idle
            }
            State::Accumulating(n) => self.accumulate(n.saturating_add(1), frame),
            State::Recording(session) => self.record(session, frame),
        }
    }

    /// Detection switched off: close any open session per `stop_policy`.
    pub fn stop(&mut self) -> RecorderEvent {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle | State::Accumulating(_) => RecorderEvent::Idle,
            State::Recording(session) => match self.config.stop_policy {
                StopPolicy::Discard => {
                    let path = session.discard();
                    log::info!(
                        "recorder {}: stopped, discarded {}",
                        self.config.stream_id,
                        path.display()
                    );
                    RecorderEvent::Discarded(path)
                }
                StopPolicy::Finalize => self.finalize(session),
            },
        }
    }

    fn accumulate(&mut self, count: u32, frame: &Frame) -> RecorderEvent {
        if count <= self.config.debounce_frames {
            self.state = State::Accumulating(count);
            return RecorderEvent::Accumulating(count);
        }

        let Some(rate) = self.rate else {
            return RecorderEvent::StartFailed;
        };
        let name = clip_file_name(&self.config.stream_id);
        let file_name = session::unique_path(&self.config.staging_dir, &name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(name);
        let session = match RecordingSession::open(&self.config.staging_dir, file_name, frame, rate)
        {
            Ok(session) => session,
            Err(err) => {
                log::error!(
                    "recorder {}: cannot start recording: {err:#}",
                    self.config.stream_id
                );
                return RecorderEvent::StartFailed;
            }
        };
        let staging = session.staging_path().to_path_buf();
        log::info!(
            "recorder {}: motion for {} frames, recording {}",
            self.config.stream_id,
            count,
            staging.display()
        );
        match self.record(session, frame) {
            RecorderEvent::Recording => RecorderEvent::Started(staging),
            other => other,
        }
    }

    fn record(&mut self, mut session: RecordingSession, frame: &Frame) -> RecorderEvent {
        if let Err(err) = session.write(frame) {
            log::error!(
                "recorder {}: write to {} failed: {err:#}",
                self.config.stream_id,
                session.staging_path().display()
            );
            session.discard();
            return RecorderEvent::WriteFailed;
        }

        // Small slack so 1001-based rates reach an exact duration.
        if session.elapsed() + Duration::from_millis(1) >= self.config.max_duration {
            return self.finalize(session);
        }
        self.state = State::Recording(session);
        RecorderEvent::Recording
    }

    fn finalize(&mut self, session: RecordingSession) -> RecorderEvent {
        let frames = session.frames_written();
        let elapsed = session.elapsed();
        let staging = session.staging_path().to_path_buf();
        match session.finalize(&self.config.clips_dir) {
            Ok(path) => {
                self.clips_finalized += 1;
                log::info!(
                    "recorder {}: finalized {} ({} frames, {:.2}s)",
                    self.config.stream_id,
                    path.display(),
                    frames,
                    elapsed.as_secs_f64()
                );
                RecorderEvent::Finalized(path)
            }
            Err(err) => {
                log::error!(
                    "recorder {}: finalize of {} failed: {err:#}",
                    self.config.stream_id,
                    staging.display()
                );
                let _ = std::fs::remove_file(&staging);
                RecorderEvent::WriteFailed
            }
        }
    }
}

impl Drop for RecordingController {
    fn drop(&mut self) {
        if matches!(self.state, State::Recording(_)) {
            self.stop();
        }
    }
}

/// `<YYYYmmdd_HHMMSS>_<stream>.y4m` in local time.
pub fn clip_file_name(stream_id: &str) -> String {
    let stream: String = stream_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "{}_{}.{}",
        Local::now().format("%Y%m%d_%H%M%S"),
        stream,
        CLIP_EXTENSION
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::frame_timestamp;
    use image::{Rgb, RgbImage};
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        controller: RecordingController,
        clips: TempDir,
        _staging: TempDir,
    }

    fn fixture(debounce: u32, max: Duration) -> Fixture {
        let staging = tempfile::tempdir().unwrap();
        let clips = tempfile::tempdir().unwrap();
        let controller = RecordingController::new(RecorderConfig {
            stream_id: "front door".to_string(),
            debounce_frames: debounce,
            max_duration: max,
            staging_dir: staging.path().to_path_buf(),
            clips_dir: clips.path().to_path_buf(),
            stop_policy: StopPolicy::Discard,
            fps: 10.0,
        });
        Fixture {
            controller,
            clips,
            _staging: staging,
        }
    }

    fn frame(index: u64) -> Frame {
        Frame::new(
            RgbImage::from_pixel(8, 6, Rgb([50, 60, 70])),
            index,
            frame_timestamp(index, 10.0),
        )
    }

    fn clips_in(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn dropout_before_threshold_never_records() {
        let mut f = fixture(30, DEFAULT_MAX_DURATION);
        for i in 0..29 {
            let event = f.controller.on_frame(&frame(i), true);
            assert_eq!(event, RecorderEvent::Accumulating(i as u32 + 1));
        }
        assert_eq!(f.controller.on_frame(&frame(29), false), RecorderEvent::Idle);
        assert_eq!(f.controller.phase(), RecorderPhase::Idle);
        assert_eq!(f.controller.counter(), 0);
    }

    #[test]
    fn recording_starts_on_frame_after_threshold() {
        let mut f = fixture(30, DEFAULT_MAX_DURATION);
        let mut started = Vec::new();
        for i in 0..31 {
            if let RecorderEvent::Started(_) = f.controller.on_frame(&frame(i), true) {
                started.push(i + 1);
            }
        }
        assert_eq!(started, vec![31]);
        assert_eq!(f.controller.phase(), RecorderPhase::Recording);
        assert!(f.controller.active_clip().is_some());
    }

    #[test]
    fn max_duration_finalizes_once_and_resets() {
        let mut f = fixture(2, Duration::from_secs(1));
        let mut finalized = Vec::new();
        let mut index = 0;
        for _ in 0..3 {
            f.controller.on_frame(&frame(index), true);
            index += 1;
        }
        assert_eq!(f.controller.phase(), RecorderPhase::Recording);
        // Nine more frames complete one second at 10 fps; motion no longer matters.
        for _ in 0..9 {
            if let RecorderEvent::Finalized(path) = f.controller.on_frame(&frame(index), false) {
                finalized.push(path);
            }
            index += 1;
        }
        assert_eq!(finalized.len(), 1);
        assert_eq!(f.controller.phase(), RecorderPhase::Idle);
        assert_eq!(f.controller.counter(), 0);
        assert_eq!(f.controller.clips_finalized(), 1);
        assert_eq!(clips_in(f.clips.path()), 1);
        let name = finalized[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("_front_door.y4m"), "{name}");
    }

    #[test]
    fn manual_stop_discards_partial_clip() {
        let mut f = fixture(0, DEFAULT_MAX_DURATION);
        let started = f.controller.on_frame(&frame(0), true);
        let RecorderEvent::Started(staged) = started else {
            panic!("expected a session, got {started:?}");
        };
        assert!(staged.exists());
        assert_eq!(f.controller.stop(), RecorderEvent::Discarded(staged.clone()));
        assert!(!staged.exists());
        assert_eq!(clips_in(f.clips.path()), 0);
        assert_eq!(f.controller.stop(), RecorderEvent::Idle);
    }

    #[test]
    fn manual_stop_can_finalize() {
        let mut f = fixture(0, DEFAULT_MAX_DURATION);
        f.controller.config.stop_policy = StopPolicy::Finalize;
        f.controller.on_frame(&frame(0), true);
        f.controller.on_frame(&frame(1), false);
        assert!(matches!(f.controller.stop(), RecorderEvent::Finalized(_)));
        assert_eq!(clips_in(f.clips.path()), 1);
    }

    #[test]
    fn open_failure_stays_idle() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();
        let mut controller = RecordingController::new(RecorderConfig {
            debounce_frames: 0,
            staging_dir: blocker.join("staging"),
            clips_dir: dir.path().join("clips"),
            fps: 10.0,
            ..RecorderConfig::default()
        });
        assert_eq!(controller.on_frame(&frame(0), true), RecorderEvent::StartFailed);
        assert_eq!(controller.phase(), RecorderPhase::Idle);
        assert_eq!(controller.counter(), 0);
    }
}

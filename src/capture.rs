//! Per-stream capture loop.
//!
//! One `CaptureLoop` per camera, on its own thread. Each tick pulls a frame,
//! runs motion detection and feeds the recorder. Ticks never overlap: a slow
//! tick delays the next one. Start/stop/shutdown commands arrive over a
//! channel and are applied between ticks.

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::frame::Frame;
use crate::geometry::BoundingBox;
use crate::ingest::FrameSource;
use crate::motion::{MotionConfig, MotionDetector};
use crate::nms;
use crate::record::{RecorderConfig, RecorderEvent, RecordingController};

// ----------------------------------------------------------------------------
// Tickers
// ----------------------------------------------------------------------------

/// Paces the loop. `wait` returns when the next tick may start.
pub trait Ticker: Send {
    fn wait(&mut self);
}

/// Fixed cadence. A late tick is not made up for with a burst.
pub struct IntervalTicker {
    interval: Duration,
    next: Option<Instant>,
}

impl IntervalTicker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: None,
        }
    }

    pub fn from_fps(fps: f64) -> Self {
        Self::new(crate::frame::frame_interval(fps))
    }
}

impl Ticker for IntervalTicker {
    fn wait(&mut self) {
        let now = Instant::now();
        if let Some(next) = self.next {
            if next > now {
                thread::sleep(next - now);
            }
        }
        let now = Instant::now();
        let due = self.next.map(|next| next.max(now)).unwrap_or(now);
        self.next = Some(due + self.interval);
    }
}

/// No pacing; the source's own blocking sets the rate.
#[derive(Default)]
pub struct FreeRunTicker;

impl Ticker for FreeRunTicker {
    fn wait(&mut self) {}
}

// ----------------------------------------------------------------------------
// Stream context
// ----------------------------------------------------------------------------

/// Everything that belongs to one camera stream's detection state.
pub struct StreamContext {
    stream_id: String,
    detector: MotionDetector,
    recorder: RecordingController,
    nms_overlap: f32,
    detecting: bool,
}

/// What one tick did.
#[derive(Debug)]
pub struct TickOutcome {
    pub frame_index: u64,
    pub has_motion: bool,
    /// Motion boxes after non-max suppression.
    pub regions: Vec<BoundingBox>,
    /// `None` while detection is off.
    pub event: Option<RecorderEvent>,
}

impl StreamContext {
    pub fn new(
        motion: &MotionConfig,
        recorder: RecorderConfig,
        detect_on_start: bool,
    ) -> Result<Self> {
        let stream_id = recorder.stream_id.clone();
        let detector = MotionDetector::new(motion)
            .with_context(|| format!("invalid motion settings for stream {stream_id}"))?;
        Ok(Self {
            stream_id,
            detector,
            recorder: RecordingController::new(recorder),
            nms_overlap: motion.nms_overlap,
            detecting: detect_on_start,
        })
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn is_detecting(&self) -> bool {
        self.detecting
    }

    pub fn recorder(&self) -> &RecordingController {
        &self.recorder
    }

    pub fn process(&mut self, frame: &Frame) -> TickOutcome {
        if !self.detecting {
            return TickOutcome {
                frame_index: frame.index,
                has_motion: false,
                regions: Vec::new(),
                event: None,
            };
        }
        let report = self.detector.detect(frame);
        let regions = nms::suppress_boxes(report.boxes, self.nms_overlap);
        let event = self.recorder.on_frame(frame, report.has_motion);
        TickOutcome {
            frame_index: frame.index,
            has_motion: report.has_motion,
            regions,
            event: Some(event),
        }
    }

    /// Resume detection. The background model carries over; it is only
    /// rebuilt when the camera session restarts.
    pub fn start_detection(&mut self) {
        if !self.detecting {
            self.detecting = true;
            log::info!("stream {}: detection on", self.stream_id);
        }
    }

    /// A new camera session starts from an empty background model.
    pub fn restart_session(&mut self) {
        self.detector.reset();
    }

    pub fn background_frames(&self) -> u64 {
        self.detector.frames_seen()
    }

    /// Stop detection; any open clip is closed before this returns.
    pub fn stop_detection(&mut self) -> RecorderEvent {
        let event = self.recorder.stop();
        if self.detecting {
            self.detecting = false;
            log::info!("stream {}: detection off", self.stream_id);
        }
        event
    }
}

// ----------------------------------------------------------------------------
// Loop
// ----------------------------------------------------------------------------

pub enum CaptureCommand {
    StartDetection,
    /// Acknowledged with the recorder's stop event once the clip is closed.
    StopDetection(Sender<RecorderEvent>),
    Shutdown,
}

/// Cloneable remote for a running loop.
#[derive(Clone)]
pub struct CaptureControl {
    tx: Sender<CaptureCommand>,
}

impl CaptureControl {
    pub fn start_detection(&self) -> Result<()> {
        self.send(CaptureCommand::StartDetection)
    }

    /// Blocks until the loop has stopped detection and closed any clip.
    pub fn stop_detection(&self) -> Result<RecorderEvent> {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        self.send(CaptureCommand::StopDetection(ack_tx))?;
        ack_rx
            .recv()
            .map_err(|_| anyhow!("capture loop exited before acknowledging stop"))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(CaptureCommand::Shutdown)
    }

    fn send(&self, command: CaptureCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| anyhow!("capture loop is not running"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    EndOfStream,
    CaptureFailed,
    Shutdown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopSummary {
    pub stream_id: String,
    pub frames: u64,
    pub clips_finalized: u64,
    pub exit: LoopExit,
}

pub struct CaptureLoop<S: FrameSource, T: Ticker> {
    source: S,
    ticker: T,
    context: StreamContext,
    commands: Receiver<CaptureCommand>,
    control: CaptureControl,
    frames: u64,
    connected: bool,
    last_health_log: Instant,
}

impl<S: FrameSource, T: Ticker> CaptureLoop<S, T> {
    pub fn new(source: S, ticker: T, context: StreamContext) -> (Self, CaptureControl) {
        let (tx, rx) = unbounded();
        let control = CaptureControl { tx };
        let capture = Self {
            source,
            ticker,
            context,
            commands: rx,
            control: control.clone(),
            frames: 0,
            connected: false,
            last_health_log: Instant::now(),
        };
        (capture, control)
    }

    pub fn control(&self) -> CaptureControl {
        self.control.clone()
    }

    pub fn context(&self) -> &StreamContext {
        &self.context
    }

    /// One frame through detection and recording. `Ok(None)` at end of stream.
    pub fn tick(&mut self) -> Result<Option<TickOutcome>> {
        if !self.connected {
            self.source.connect()?;
            self.context.restart_session();
            self.connected = true;
        }
        self.ticker.wait();
        let Some(frame) = self.source.next_frame()? else {
            return Ok(None);
        };
        self.frames += 1;
        let outcome = self.context.process(&frame);
        if let Some(event) = &outcome.event {
            log_event(self.context.stream_id(), event);
        }
        Ok(Some(outcome))
    }

    /// Apply pending commands. Returns false once shutdown was requested.
    fn drain_commands(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(CaptureCommand::StartDetection) => self.context.start_detection(),
                Ok(CaptureCommand::StopDetection(ack)) => {
                    let event = self.context.stop_detection();
                    let _ = ack.send(event);
                }
                Ok(CaptureCommand::Shutdown) => return false,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return true,
            }
        }
    }

    /// Run until end of stream, a capture error or shutdown.
    pub fn run(mut self) -> LoopSummary {
        let stream_id = self.context.stream_id().to_string();
        log::info!("capture loop for {} starting", stream_id);
        let exit = loop {
            if !self.drain_commands() {
                break LoopExit::Shutdown;
            }
            match self.tick() {
                Ok(Some(outcome)) => {
                    if !outcome.regions.is_empty() {
                        log::debug!(
                            "stream {}: frame {}: {} motion region(s)",
                            stream_id,
                            outcome.frame_index,
                            outcome.regions.len()
                        );
                    }
                }
                Ok(None) => {
                    log::info!("stream {}: end of stream", stream_id);
                    break LoopExit::EndOfStream;
                }
                Err(err) => {
                    log::error!("stream {}: capture failed: {err:#}", stream_id);
                    break LoopExit::CaptureFailed;
                }
            }
            if self.last_health_log.elapsed() >= Duration::from_secs(5) {
                let stats = self.source.stats();
                log::info!(
                    "stream {} health={} frames={} phase={:?} uri={}",
                    stream_id,
                    self.source.is_healthy(),
                    stats.frames_captured,
                    self.context.recorder().phase(),
                    stats.uri
                );
                self.last_health_log = Instant::now();
            }
        };

        let stop_event = self.context.stop_detection();
        log_event(&stream_id, &stop_event);
        // Answer stop requests that raced with the exit.
        while let Ok(command) = self.commands.try_recv() {
            if let CaptureCommand::StopDetection(ack) = command {
                let _ = ack.send(RecorderEvent::Idle);
            }
        }
        self.source.close();

        let summary = LoopSummary {
            stream_id,
            frames: self.frames,
            clips_finalized: self.context.recorder().clips_finalized(),
            exit,
        };
        log::info!(
            "capture loop for {} stopped ({:?}, {} frames, {} clips)",
            summary.stream_id,
            summary.exit,
            summary.frames,
            summary.clips_finalized
        );
        summary
    }
}

impl<S, T> CaptureLoop<S, T>
where
    S: FrameSource + 'static,
    T: Ticker + 'static,
{
    pub fn spawn(self) -> Result<CaptureHandle> {
        let name = format!("capture-{}", self.context.stream_id());
        let control = self.control.clone();
        let join = thread::Builder::new()
            .name(name)
            .spawn(move || self.run())
            .context("failed to spawn capture thread")?;
        Ok(CaptureHandle { control, join })
    }
}

fn log_event(stream_id: &str, event: &RecorderEvent) {
    match event {
        RecorderEvent::Idle | RecorderEvent::Recording => {
            log::trace!("stream {stream_id}: {event:?}")
        }
        RecorderEvent::Accumulating(n) => log::trace!("stream {stream_id}: motion x{n}"),
        RecorderEvent::Started(_) | RecorderEvent::Finalized(_) | RecorderEvent::Discarded(_) => {
            log::debug!("stream {stream_id}: {event:?}")
        }
        RecorderEvent::StartFailed | RecorderEvent::WriteFailed => {
            log::warn!("stream {stream_id}: {event:?}")
        }
    }
}

/// A capture loop running on its own thread.
pub struct CaptureHandle {
    control: CaptureControl,
    join: JoinHandle<LoopSummary>,
}

impl CaptureHandle {
    pub fn control(&self) -> &CaptureControl {
        &self.control
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Ask the loop to stop and wait for it.
    pub fn shutdown(self) -> Result<LoopSummary> {
        // The loop may already have exited on its own.
        let _ = self.control.shutdown();
        self.join()
    }

    pub fn join(self) -> Result<LoopSummary> {
        self.join
            .join()
            .map_err(|_| anyhow!("capture thread panicked"))
    }
}

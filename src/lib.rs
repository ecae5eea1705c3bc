//! Clip Sentinel
//!
//! Motion-triggered clip recording plus offline object detection and
//! tracking of the recorded clips.
//!
//! # Architecture
//!
//! Two independent contexts share nothing but a directory:
//!
//! 1. **Capture**: one `CaptureLoop` per camera pulls frames from a
//!    `FrameSource`, runs the stream's `MotionDetector` and feeds the result
//!    into its `RecordingController`. Clips are written to a staging
//!    directory and renamed into the clips directory once complete.
//! 2. **Analysis**: a `ClipWatcher` notices finished clips and queues them; a
//!    single `AnalysisWorker` runs each through the
//!    `DetectionTrackingPipeline`, which writes an annotated copy and a text
//!    summary, then optionally transcodes and registers the result.
//!
//! # Module Structure
//!
//! - `frame`, `geometry`: frames, masks and boxes
//! - `ingest`: frame sources (synthetic scenes, `.y4m` clips, ffmpeg)
//! - `motion`, `nms`: background subtraction and box suppression
//! - `record`, `capture`: clip recording and the per-stream loop
//! - `detect`, `track`: detector and tracker backends
//! - `analysis`: watcher, queue, worker and the per-clip pipeline
//! - `video`: the clip container and the transcoder
//! - `transport`: the footage catalogue client
//! - `config`, `ui`: configuration and CLI progress output

pub mod analysis;
pub mod capture;
pub mod config;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod motion;
pub mod nms;
pub mod record;
pub mod track;
pub mod transport;
pub mod ui;
pub mod video;

pub use analysis::{
    AnalysisConfig, AnalysisJob, AnalysisOutput, AnalysisService, AnalysisWorker, ClipTask,
    ClipWatcher, DetectionTrackingPipeline, SummaryRecord, WorkerReport,
};
pub use capture::{CaptureControl, CaptureHandle, CaptureLoop, StreamContext};
pub use config::SentinelConfig;
pub use detect::{detector_from_config, Detection, ObjectDetector};
pub use frame::{ForegroundMask, Frame};
pub use geometry::BoundingBox;
pub use ingest::{CameraSource, FrameSource, SourceConfig};
pub use motion::{MotionConfig, MotionDetector, MotionReport};
pub use record::{RecorderConfig, RecorderEvent, RecordingController};
pub use track::{IouTracker, Track, Tracker, TrackerConfig};
pub use transport::{FootageStore, HttpFootageStore, InMemoryFootageStore};

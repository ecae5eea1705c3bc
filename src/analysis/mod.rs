//! Offline analysis of finished clips.
//!
//! `ClipWatcher` notices clips arriving in the clips directory and pushes them
//! onto the `AnalysisQueue`; a single `AnalysisWorker` pops them in order and
//! runs a `ClipProcessor` (normally an `AnalysisJob` wrapping the
//! `DetectionTrackingPipeline`). `AnalysisService` ties the three together and
//! owns the shutdown order.

pub mod annotate;
mod pipeline;
mod queue;
mod service;
mod summary;
mod watcher;
mod worker;

pub use pipeline::{output_paths, AnalysisConfig, AnalysisOutput, DetectionTrackingPipeline};
pub use queue::{analysis_queue, ClipTask, QueueConsumer, QueueProducer};
pub use service::AnalysisService;
pub use summary::{SummaryEntry, SummaryRecord};
pub use watcher::{arrivals, ClipWatcher};
pub use worker::{AnalysisJob, AnalysisWorker, ClipProcessor, JobOutcome, WorkerReport};

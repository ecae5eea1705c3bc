//! The analysis worker and the per-clip job it runs.

use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::pipeline::{AnalysisOutput, DetectionTrackingPipeline};
use super::queue::{ClipTask, QueueConsumer};
use crate::detect::ObjectDetector;
use crate::record::session::unique_path;
use crate::track::Tracker;
use crate::transport::{event_title, FootageStore, EVENT_TYPE};
use crate::video::{transcoded_path, Transcoder};

/// Work done for one dequeued clip.
pub trait ClipProcessor: Send {
    fn process(&mut self, clip: &Path) -> Result<()>;
}

impl<P: ClipProcessor + ?Sized> ClipProcessor for Box<P> {
    fn process(&mut self, clip: &Path) -> Result<()> {
        (**self).process(clip)
    }
}

/// Result of a finished job: the analysis plus whatever was published.
#[derive(Clone, Debug)]
pub struct JobOutcome {
    pub analysis: AnalysisOutput,
    pub transcoded: Option<PathBuf>,
    pub footage_id: Option<i64>,
    pub event_id: Option<i64>,
}

/// Analyze a clip, then transcode the annotated output and register it with
/// the footage store.
///
/// If publishing fails, the outputs of this run are removed so the output
/// directory never holds results that were not published.
pub struct AnalysisJob<D, T> {
    pipeline: DetectionTrackingPipeline<D, T>,
    transcoder: Option<Box<dyn Transcoder>>,
    store: Option<Box<dyn FootageStore>>,
}

impl<D: ObjectDetector, T: Tracker> AnalysisJob<D, T> {
    pub fn new(pipeline: DetectionTrackingPipeline<D, T>) -> Self {
        Self {
            pipeline,
            transcoder: None,
            store: None,
        }
    }

    pub fn with_transcoder(mut self, transcoder: Box<dyn Transcoder>) -> Self {
        self.transcoder = Some(transcoder);
        self
    }

    pub fn with_store(mut self, store: Box<dyn FootageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn run(&mut self, clip: &Path) -> Result<JobOutcome> {
        let analysis = self.pipeline.analyze(clip)?;
        let mut outcome = JobOutcome {
            analysis,
            transcoded: None,
            footage_id: None,
            event_id: None,
        };
        if let Err(err) = self.publish(&mut outcome) {
            let analysis = &outcome.analysis;
            let outputs = [
                Some(analysis.annotated_path.clone()),
                Some(analysis.summary_path.clone()),
                outcome.transcoded.clone(),
            ];
            for path in outputs.into_iter().flatten() {
                match fs::remove_file(&path) {
                    Ok(()) => log::debug!("removed unpublished {}", path.display()),
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => log::warn!("failed to remove {}: {err}", path.display()),
                }
            }
            return Err(err.context(format!("publishing {} failed", clip.display())));
        }
        Ok(outcome)
    }

    fn publish(&self, outcome: &mut JobOutcome) -> Result<()> {
        if outcome.analysis.entries.is_empty() {
            log::info!(
                "{}: nothing tracked, publishing anyway",
                outcome.analysis.clip.display()
            );
        }
        let video = match &self.transcoder {
            Some(transcoder) => {
                let target = transcoded_path(&outcome.analysis.annotated_path);
                outcome.transcoded = Some(target.clone());
                transcoder.transcode(&outcome.analysis.annotated_path, &target)?;
                target
            }
            None => outcome.analysis.annotated_path.clone(),
        };

        if let Some(store) = &self.store {
            let file_name = video
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let duration = outcome.analysis.duration().as_secs_f64();
            let footage_id = store
                .insert_footage(&file_name, duration)
                .with_context(|| format!("failed to store footage {file_name}"))?;
            outcome.footage_id = Some(footage_id);
            let event_id = store
                .insert_event(EVENT_TYPE, &event_title(footage_id), footage_id)
                .with_context(|| format!("failed to store event for footage {footage_id}"))?;
            outcome.event_id = Some(event_id);
        }
        Ok(())
    }
}

impl<D: ObjectDetector, T: Tracker> ClipProcessor for AnalysisJob<D, T> {
    fn process(&mut self, clip: &Path) -> Result<()> {
        self.run(clip).map(|_| ())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub processed: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

/// Single consumer of the analysis queue. One clip at a time, in order.
pub struct AnalysisWorker<P> {
    consumer: QueueConsumer,
    processor: P,
    quarantine_dir: Option<PathBuf>,
}

impl<P: ClipProcessor> AnalysisWorker<P> {
    pub fn new(consumer: QueueConsumer, processor: P) -> Self {
        Self {
            consumer,
            processor,
            quarantine_dir: None,
        }
    }

    /// Move clips that fail analysis into `dir`.
    pub fn with_quarantine(mut self, dir: impl Into<PathBuf>) -> Self {
        self.quarantine_dir = Some(dir.into());
        self
    }

    /// Process tasks until the shutdown sentinel.
    pub fn run(mut self) -> WorkerReport {
        let mut report = WorkerReport::default();
        loop {
            let clip = match self.consumer.pop() {
                ClipTask::Shutdown => break,
                ClipTask::Analyze(clip) => clip,
            };
            match self.processor.process(&clip) {
                Ok(()) => {
                    log::info!("analysis of {} complete", clip.display());
                    report.processed.push(clip);
                }
                Err(err) => {
                    log::error!("analysis of {} failed: {err:#}", clip.display());
                    if let Some(dir) = &self.quarantine_dir {
                        if let Err(err) = quarantine(&clip, dir) {
                            log::warn!("{err:#}");
                        }
                    }
                    report.failed.push(clip);
                }
            }
        }
        log::info!(
            "analysis worker stopped ({} processed, {} failed)",
            report.processed.len(),
            report.failed.len()
        );
        report
    }
}

fn quarantine(clip: &Path, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create quarantine dir {}", dir.display()))?;
    let name = clip
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "clip".to_string());
    let target = unique_path(dir, &name);
    fs::rename(clip, &target).with_context(|| {
        format!("failed to quarantine {} to {}", clip.display(), target.display())
    })?;
    log::warn!("quarantined {} as {}", clip.display(), target.display());
    Ok(target)
}

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use super::queue::{analysis_queue, QueueProducer};
use super::watcher::ClipWatcher;
use super::worker::{AnalysisWorker, ClipProcessor, WorkerReport};

/// Watcher, queue and worker thread for one clips directory.
pub struct AnalysisService {
    watcher: ClipWatcher,
    producer: QueueProducer,
    worker: JoinHandle<WorkerReport>,
}

impl AnalysisService {
    pub fn start<P>(clips_dir: &Path, processor: P, quarantine_dir: Option<PathBuf>) -> Result<Self>
    where
        P: ClipProcessor + 'static,
    {
        let (producer, consumer) = analysis_queue();
        let mut worker = AnalysisWorker::new(consumer, processor);
        if let Some(dir) = quarantine_dir {
            worker = worker.with_quarantine(dir);
        }
        let worker = thread::Builder::new()
            .name("analysis-worker".to_string())
            .spawn(move || worker.run())
            .context("failed to spawn analysis worker")?;
        let watcher = match ClipWatcher::start(clips_dir, producer.clone()) {
            Ok(watcher) => watcher,
            Err(err) => {
                let _ = producer.shutdown();
                let _ = worker.join();
                return Err(err);
            }
        };
        Ok(Self {
            watcher,
            producer,
            worker,
        })
    }

    /// Producer for clips found outside the watcher (e.g. a startup backlog).
    pub fn producer(&self) -> &QueueProducer {
        &self.producer
    }

    pub fn watcher(&self) -> &ClipWatcher {
        &self.watcher
    }

    /// Stop the watcher, queue the sentinel, then wait for the worker to
    /// drain everything queued ahead of it.
    pub fn shutdown(mut self) -> Result<WorkerReport> {
        self.watcher.stop();
        self.producer.shutdown()?;
        self.worker
            .join()
            .map_err(|_| anyhow!("analysis worker panicked"))
    }
}

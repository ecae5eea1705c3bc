//! FIFO hand-off between the clip watcher and the analysis worker.

use anyhow::{anyhow, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClipTask {
    /// Analyze the finished clip at this path.
    Analyze(PathBuf),
    /// Stop the worker. Everything queued before it is processed first.
    Shutdown,
}

/// Create an unbounded queue with one consumer.
pub fn analysis_queue() -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = unbounded();
    (QueueProducer { tx }, QueueConsumer { rx })
}

#[derive(Clone, Debug)]
pub struct QueueProducer {
    tx: Sender<ClipTask>,
}

impl QueueProducer {
    pub fn enqueue(&self, clip: PathBuf) -> Result<()> {
        self.push(ClipTask::Analyze(clip))
    }

    /// Push the shutdown sentinel.
    pub fn shutdown(&self) -> Result<()> {
        self.push(ClipTask::Shutdown)
    }

    pub fn push(&self, task: ClipTask) -> Result<()> {
        self.tx
            .send(task)
            .map_err(|err| anyhow!("analysis queue closed, dropped {:?}", err.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

#[derive(Debug)]
pub struct QueueConsumer {
    rx: Receiver<ClipTask>,
}

impl QueueConsumer {
    /// Block for the next task. Once every producer is gone this yields
    /// `Shutdown`.
    pub fn pop(&self) -> ClipTask {
        self.rx.recv().unwrap_or(ClipTask::Shutdown)
    }

    /// Like `pop`, but `None` if nothing arrives within `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<ClipTask> {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => Some(task),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(ClipTask::Shutdown),
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

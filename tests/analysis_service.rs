use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use clip_sentinel::analysis::{
    analysis_queue, AnalysisService, AnalysisWorker, ClipProcessor, ClipTask, ClipWatcher,
};

/// Records every clip it is handed.
#[derive(Clone, Default)]
struct Recorder {
    seen: Arc<Mutex<Vec<PathBuf>>>,
}

impl Recorder {
    fn seen(&self) -> Vec<PathBuf> {
        self.seen.lock().unwrap().clone()
    }
}

impl ClipProcessor for Recorder {
    fn process(&mut self, clip: &Path) -> Result<()> {
        self.seen.lock().unwrap().push(clip.to_path_buf());
        Ok(())
    }
}

fn wait_for(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    done()
}

#[test]
fn worker_processes_tasks_in_order_then_stops() -> Result<()> {
    let (producer, consumer) = analysis_queue();
    let clips: Vec<PathBuf> = (0..5).map(|i| PathBuf::from(format!("clip{i}.y4m"))).collect();
    for clip in &clips {
        producer.enqueue(clip.clone())?;
    }
    producer.shutdown()?;
    // Anything after the sentinel is never processed.
    producer.enqueue("late.y4m".into())?;

    let recorder = Recorder::default();
    let report = AnalysisWorker::new(consumer, recorder.clone()).run();
    assert_eq!(report.processed, clips);
    assert!(report.failed.is_empty());
    assert_eq!(recorder.seen(), clips);
    Ok(())
}

#[test]
fn sentinel_alone_exits_immediately() -> Result<()> {
    let (producer, consumer) = analysis_queue();
    producer.shutdown()?;
    let recorder = Recorder::default();
    let report = AnalysisWorker::new(consumer, recorder.clone()).run();
    assert!(report.processed.is_empty());
    assert!(recorder.seen().is_empty());
    Ok(())
}

#[test]
fn watcher_queues_renamed_clips_but_not_hidden_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (producer, consumer) = analysis_queue();
    let mut watcher = ClipWatcher::start(dir.path(), producer)?;

    let hidden = dir.path().join(".clip.y4m.partial");
    std::fs::write(&hidden, b"frames")?;
    std::fs::rename(&hidden, dir.path().join("clip.y4m"))?;

    match consumer.pop_timeout(Duration::from_secs(5)) {
        Some(ClipTask::Analyze(path)) => {
            assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("clip.y4m"));
        }
        other => panic!("expected a queued clip, got {other:?}"),
    }
    assert!(watcher.is_healthy());
    assert_eq!(watcher.enqueued(), 1);

    watcher.stop();
    assert!(!watcher.is_healthy());
    Ok(())
}

#[test]
fn service_drains_queue_before_shutdown() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let recorder = Recorder::default();
    let service = AnalysisService::start(dir.path(), recorder.clone(), None)?;

    std::fs::write(dir.path().join("a.y4m"), b"frames")?;
    assert!(wait_for(Duration::from_secs(5), || !recorder.seen().is_empty()));

    service.producer().enqueue(dir.path().join("backlog.y4m"))?;
    let report = service.shutdown()?;
    assert_eq!(report.processed.len(), 2);
    assert_eq!(
        report.processed[1].file_name().and_then(|n| n.to_str()),
        Some("backlog.y4m")
    );
    Ok(())
}

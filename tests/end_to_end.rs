use anyhow::Result;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use clip_sentinel::analysis::{
    AnalysisConfig, AnalysisJob, AnalysisService, DetectionTrackingPipeline,
};
use clip_sentinel::capture::{CaptureLoop, FreeRunTicker, LoopExit, StreamContext};
use clip_sentinel::detect::{Detection, ObjectDetector};
use clip_sentinel::frame::Frame;
use clip_sentinel::geometry::BoundingBox;
use clip_sentinel::ingest::{CameraSource, SourceConfig};
use clip_sentinel::motion::MotionConfig;
use clip_sentinel::record::RecorderConfig;
use clip_sentinel::track::IouTracker;
use clip_sentinel::transport::{InMemoryFootageStore, EVENT_TYPE};
use clip_sentinel::video::Y4mReader;

const FPS: f64 = 10.0;

/// Stand-in for a trained model: the bright synthetic object is a person.
struct BrightObjectDetector;

impl ObjectDetector for BrightObjectDetector {
    fn name(&self) -> &'static str {
        "bright"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, pixel) in frame.pixels().enumerate_pixels() {
            if pixel.0[1] > 180 {
                bounds = Some(match bounds {
                    None => (x, y, x, y),
                    Some((x1, y1, x2, y2)) => (x1.min(x), y1.min(y), x2.max(x), y2.max(y)),
                });
            }
        }
        Ok(bounds
            .map(|(x1, y1, x2, y2)| {
                let bbox =
                    BoundingBox::new(x1 as i32, y1 as i32, x2 as i32 + 1, y2 as i32 + 1);
                vec![Detection::new(bbox, 0.9, "person")]
            })
            .unwrap_or_default())
    }
}

fn wait_for_file(path: &Path, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if path.exists() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    path.exists()
}

fn clips_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut clips = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        clips.push(entry?.path());
    }
    clips.sort();
    Ok(clips)
}

#[test]
fn synthetic_scene_is_recorded_analyzed_and_published() -> Result<()> {
    let root = tempfile::tempdir()?;
    let clips_dir = root.path().join("clips");
    let analyses_dir = root.path().join("analyses");
    std::fs::create_dir_all(&clips_dir)?;

    let store = InMemoryFootageStore::new();
    let pipeline = DetectionTrackingPipeline::new(
        BrightObjectDetector,
        IouTracker::default(),
        AnalysisConfig {
            output_dir: analyses_dir.clone(),
            ..AnalysisConfig::default()
        },
    );
    let job = AnalysisJob::new(pipeline).with_store(Box::new(store.clone()));
    let service = AnalysisService::start(&clips_dir, job, None)?;

    // 12 s scene, object present from 2 s to 9 s.
    let source = CameraSource::new(SourceConfig {
        uri: "stub://yard?object=2-9&duration=12".to_string(),
        target_fps: FPS,
        width: 160,
        height: 120,
        ..SourceConfig::default()
    })?;
    let recorder = RecorderConfig {
        stream_id: "yard".to_string(),
        debounce_frames: 5,
        max_duration: Duration::from_secs(5),
        staging_dir: root.path().join("staging"),
        clips_dir: clips_dir.clone(),
        fps: FPS,
        ..RecorderConfig::default()
    };
    let context = StreamContext::new(&MotionConfig::default(), recorder, true)?;
    let (capture, _control) = CaptureLoop::new(source, FreeRunTicker, context);
    let summary = capture.run();

    assert_eq!(summary.exit, LoopExit::EndOfStream);
    assert_eq!(summary.frames, 120);
    assert_eq!(summary.clips_finalized, 1);
    let clips = clips_in(&clips_dir)?;
    assert_eq!(clips.len(), 1);
    let clip = &clips[0];
    let stem = clip
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .unwrap_or_default();
    assert!(stem.ends_with("_yard"));

    let summary_path = analyses_dir.join(format!("{stem}_summary.txt"));
    assert!(
        wait_for_file(&summary_path, Duration::from_secs(30)),
        "analysis never produced {}",
        summary_path.display()
    );
    let report = service.shutdown()?;
    assert_eq!(report.processed.len(), 1);
    assert!(report.failed.is_empty());

    // Annotated copy keeps the clip's frame count, rate and size.
    let mut source_clip = Y4mReader::open(clip)?;
    while source_clip.read_frame()?.is_some() {}
    assert!(source_clip.frames_read() as f64 <= 5.0 * FPS);
    let mut annotated = Y4mReader::open(&analyses_dir.join(format!("{stem}_annotated.y4m")))?;
    while annotated.read_frame()?.is_some() {}
    assert_eq!(annotated.frames_read(), source_clip.frames_read());
    assert_eq!(annotated.fps(), FPS);
    assert_eq!((annotated.width(), annotated.height()), (160, 120));

    let lines = std::fs::read_to_string(&summary_path)?;
    assert!(lines.lines().count() >= 1);
    assert!(lines.starts_with("Person detected at "));

    let footage = store.footage();
    assert_eq!(footage.len(), 1);
    assert_eq!(footage[0].file_path, format!("{stem}_annotated.y4m"));
    assert!((footage[0].duration - source_clip.frames_read() as f64 / FPS).abs() < 1e-9);
    let events = store.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EVENT_TYPE);
    assert_eq!(events[0].title, format!("Footage ID {}", footage[0].id));
    Ok(())
}

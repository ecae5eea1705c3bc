//! sentineld - Clip Sentinel daemon
//!
//! This daemon:
//! 1. Captures frames from the configured source
//! 2. Records a clip whenever sustained motion is seen
//! 3. Watches the clips directory and analyzes every finished clip
//! 4. Transcodes and registers clips in which something was tracked

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use clip_sentinel::analysis::{AnalysisJob, AnalysisService, DetectionTrackingPipeline};
use clip_sentinel::capture::{CaptureHandle, CaptureLoop, FreeRunTicker, IntervalTicker};
use clip_sentinel::video::CLIP_EXTENSION;
use clip_sentinel::{
    detector_from_config, CameraSource, IouTracker, SentinelConfig, StreamContext,
};

/// Time allowed for the watcher to see the last clip before it is stopped.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,
    /// Run analysis only.
    #[arg(long)]
    no_capture: bool,
    /// Record clips only.
    #[arg(long)]
    no_analysis: bool,
    /// Queue clips already in the clips directory at startup.
    #[arg(long)]
    analyze_existing: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = SentinelConfig::load_from(args.config.as_deref())?;

    let service = if args.no_analysis {
        None
    } else {
        Some(start_analysis(&cfg, args.analyze_existing)?)
    };
    let capture = if args.no_capture {
        None
    } else {
        Some(start_capture(&cfg)?)
    };
    log::info!(
        "sentineld running (capture: {}, analysis: {})",
        capture.is_some(),
        service.is_some()
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("sentineld waiting for shutdown signal (Ctrl-C)...");
    loop {
        match rx.recv_timeout(Duration::from_millis(250)) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                log::info!("shutdown signal received");
                break;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if capture.as_ref().map(|c| c.is_finished()).unwrap_or(false)
                    && service.is_none()
                {
                    log::info!("capture finished");
                    break;
                }
            }
        }
    }

    if let Some(capture) = capture {
        match capture.shutdown() {
            Ok(summary) => log::info!(
                "stream {}: {} frames, {} clips",
                summary.stream_id,
                summary.frames,
                summary.clips_finalized
            ),
            Err(err) => log::error!("{err:#}"),
        }
        std::thread::sleep(SETTLE_DELAY);
    }
    if let Some(service) = service {
        let report = service.shutdown()?;
        log::info!(
            "analysis: {} processed, {} failed",
            report.processed.len(),
            report.failed.len()
        );
    }
    Ok(())
}

fn start_capture(cfg: &SentinelConfig) -> Result<CaptureHandle> {
    let source = CameraSource::new(cfg.source.clone())?;
    let context = StreamContext::new(&cfg.motion, cfg.recording.clone(), cfg.detect_on_start)?;
    log::info!(
        "capturing {} ({} source) into {}",
        cfg.source.uri,
        source.kind(),
        cfg.recording.clips_dir.display()
    );
    // Live sources block on the camera; files and synthetic scenes need pacing.
    if source.kind() == "ffmpeg" {
        CaptureLoop::new(source, FreeRunTicker, context).0.spawn()
    } else {
        let ticker = IntervalTicker::from_fps(cfg.source.target_fps);
        CaptureLoop::new(source, ticker, context).0.spawn()
    }
}

fn start_analysis(cfg: &SentinelConfig, analyze_existing: bool) -> Result<AnalysisService> {
    let detector = detector_from_config(&cfg.detector)?;
    let tracker = IouTracker::new(cfg.tracker);
    let pipeline = DetectionTrackingPipeline::new(detector, tracker, cfg.analysis.clone());
    let mut job = AnalysisJob::new(pipeline);
    if let Some(transcoder) = cfg.transcoder() {
        job = job.with_transcoder(transcoder);
    }
    if let Some(store) = cfg.footage_store() {
        log::info!("publishing to {}", cfg.api.url);
        job = job.with_store(store);
    }
    let service = AnalysisService::start(
        &cfg.recording.clips_dir,
        job,
        cfg.quarantine_dir.clone(),
    )?;
    if analyze_existing {
        for clip in existing_clips(service.watcher().dir())? {
            service.producer().enqueue(clip)?;
        }
    }
    Ok(service)
}

fn existing_clips(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut clips = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?
    {
        let path = entry?.path();
        let visible = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| !n.starts_with('.'))
            .unwrap_or(false);
        let is_clip = path
            .extension()
            .map(|ext| ext == CLIP_EXTENSION)
            .unwrap_or(false);
        if visible && is_clip && path.is_file() {
            clips.push(path);
        }
    }
    clips.sort();
    Ok(clips)
}

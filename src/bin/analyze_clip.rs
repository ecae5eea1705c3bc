//! analyze_clip - run detection and tracking over one recorded clip

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use clip_sentinel::analysis::{AnalysisJob, DetectionTrackingPipeline};
use clip_sentinel::ui::{Ui, UiMode};
use clip_sentinel::{detector_from_config, IouTracker, SentinelConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Clip to analyze (.y4m).
    clip: PathBuf,
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,
    /// Output directory for the annotated clip and summary.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Skip the H.264 re-encode.
    #[arg(long)]
    no_transcode: bool,
    /// Do not register the result with the footage API.
    #[arg(long)]
    no_upload: bool,
    /// UI mode for stderr progress.
    #[arg(long, value_enum, default_value_t = UiMode::Auto, value_name = "MODE")]
    ui: UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let ui = Ui::new(args.ui, std::io::stderr().is_terminal());

    if !args.clip.is_file() {
        return Err(anyhow!("clip {} does not exist", args.clip.display()));
    }
    let mut cfg = SentinelConfig::load_from(args.config.as_deref())?;
    if let Some(out) = args.out {
        cfg.analysis.output_dir = out;
    }

    let detector = {
        let stage = ui.stage("Load detector");
        stage.finish(detector_from_config(&cfg.detector))?
    };

    let stage = ui.stage("Analyze clip");
    let counter = stage.frame_counter();
    let pipeline =
        DetectionTrackingPipeline::new(detector, IouTracker::new(cfg.tracker), cfg.analysis.clone())
            .with_progress(move |frames| counter.set(frames));
    let mut job = AnalysisJob::new(pipeline);
    if !args.no_transcode {
        if let Some(transcoder) = cfg.transcoder() {
            job = job.with_transcoder(transcoder);
        }
    }
    if !args.no_upload {
        if let Some(store) = cfg.footage_store() {
            job = job.with_store(store);
        }
    }
    let outcome = {
        let mut stage = stage;
        match job.run(&args.clip) {
            Ok(outcome) => {
                stage.set_detail(format!(
                    "{} tracked object(s)",
                    outcome.analysis.entries.len()
                ));
                outcome
            }
            Err(err) => {
                stage.fail(format!("{err:#}"));
                return Err(err);
            }
        }
    };
    let output = &outcome.analysis;

    for entry in &output.entries {
        println!("{}", entry.line());
    }
    println!("annotated: {}", output.annotated_path.display());
    println!("summary: {}", output.summary_path.display());
    if let Some(video) = &outcome.transcoded {
        println!("video: {}", video.display());
    }
    if let Some(id) = outcome.footage_id {
        println!("footage id: {id}");
    }
    Ok(())
}

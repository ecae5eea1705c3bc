//! Progress output for `analyze_clip`: one line (or spinner) per stage, with a
//! running frame count while a clip is being analyzed.

use anyhow::Result;
use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum UiMode {
    /// Spinners when stderr is a terminal.
    #[default]
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, stderr_is_tty: bool) -> Self {
        let pretty = match mode {
            UiMode::Plain => false,
            UiMode::Auto | UiMode::Pretty => stderr_is_tty,
        };
        Self { pretty }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        let spinner = if self.pretty {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            spinner.set_style(spinner_style("{spinner} {msg}"));
            spinner.set_message(name.to_string());
            Some(spinner)
        } else {
            eprintln!("==> {name}");
            None
        };
        StageGuard {
            name: name.to_string(),
            start: Instant::now(),
            counter: FrameCounter {
                frames: Arc::new(AtomicU64::new(0)),
                spinner: spinner.clone(),
            },
            spinner,
            detail: None,
            failure: None,
        }
    }
}

/// Frame tally shared with the pipeline's progress hook.
#[derive(Clone)]
pub struct FrameCounter {
    frames: Arc<AtomicU64>,
    spinner: Option<ProgressBar>,
}

impl FrameCounter {
    pub fn set(&self, frames: u64) {
        self.frames.store(frames, Ordering::Relaxed);
        if let Some(spinner) = &self.spinner {
            spinner.set_position(frames);
        }
    }

    pub fn get(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

/// Reports the stage when dropped: done, or failed with a reason.
pub struct StageGuard {
    name: String,
    start: Instant,
    counter: FrameCounter,
    spinner: Option<ProgressBar>,
    detail: Option<String>,
    failure: Option<String>,
}

impl StageGuard {
    /// Counter for a stage that walks a clip; the spinner shows its count.
    pub fn frame_counter(&self) -> FrameCounter {
        if let Some(spinner) = &self.spinner {
            spinner.set_style(spinner_style("{spinner} {msg} [{pos} frames]"));
        }
        self.counter.clone()
    }

    /// Extra text for the completion line, e.g. how many objects were tracked.
    pub fn set_detail(&mut self, detail: impl Into<String>) {
        self.detail = Some(detail.into());
    }

    pub fn fail(mut self, reason: impl Into<String>) {
        self.failure = Some(reason.into());
    }

    /// Close the stage according to `result` and pass it through.
    pub fn finish<T, E: Display>(self, result: Result<T, E>) -> Result<T, E> {
        if let Err(err) = &result {
            self.fail(format!("{err:#}"));
        }
        result
    }

    fn summary(&self) -> String {
        let elapsed = format_duration(self.start.elapsed());
        let mut facts = Vec::new();
        let frames = self.counter.get();
        if frames > 0 {
            facts.push(format!("{frames} frames"));
        }
        facts.extend(self.detail.clone());
        facts.push(elapsed);
        match &self.failure {
            None => format!("✔ {} ({})", self.name, facts.join(", ")),
            Some(reason) => format!("✘ {} ({}): {reason}", self.name, facts.join(", ")),
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let message = self.summary();
        match &self.spinner {
            Some(spinner) => {
                spinner.set_style(ProgressStyle::default_spinner());
                spinner.finish_with_message(message);
            }
            None => eprintln!("{message}"),
        }
    }
}

fn spinner_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_switch_units_at_one_second() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }

    #[test]
    fn plain_mode_never_spins() {
        let ui = Ui::new(UiMode::Plain, true);
        let stage = ui.stage("Analyze clip");
        assert!(stage.spinner.is_none());
        stage.fail("boom");
    }

    #[test]
    fn summary_carries_frames_and_detail() {
        let ui = Ui::new(UiMode::Pretty, false);
        let mut stage = ui.stage("Analyze clip");
        stage.frame_counter().set(120);
        stage.set_detail("2 tracked object(s)");
        let line = stage.summary();
        assert!(line.starts_with("✔ Analyze clip (120 frames, 2 tracked object(s), "));
    }

    #[test]
    fn finish_marks_errors() {
        let ui = Ui::new(UiMode::Plain, false);
        let stage = ui.stage("Load detector");
        let result: Result<(), String> = stage.finish(Err("no model".to_string()));
        assert!(result.is_err());
    }
}

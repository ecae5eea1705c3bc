//! Per-clip detection, tracking and annotation.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::annotate::draw_track;
use super::summary::{SummaryEntry, SummaryRecord};
use crate::detect::{Detection, ObjectDetector};
use crate::track::Tracker;
use crate::video::{Y4mReader, Y4mWriter, CLIP_EXTENSION};

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Where annotated clips and summaries are written.
    pub output_dir: PathBuf,
    /// Minimum confidence after rounding up to hundredths.
    pub min_confidence: f32,
    pub allowed_classes: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data/analyses"),
            min_confidence: 0.63,
            allowed_classes: vec!["person".into(), "dog".into(), "cat".into()],
        }
    }
}

impl AnalysisConfig {
    pub fn accepts(&self, detection: &Detection) -> bool {
        detection.rounded_confidence() >= self.min_confidence
            && self.allowed_classes.iter().any(|c| *c == detection.label)
    }
}

#[derive(Clone, Debug)]
pub struct AnalysisOutput {
    pub clip: PathBuf,
    pub annotated_path: PathBuf,
    pub summary_path: PathBuf,
    pub frames: u64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub entries: Vec<SummaryEntry>,
}

impl AnalysisOutput {
    /// Length of the annotated output.
    pub fn duration(&self) -> Duration {
        if self.fps <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames as f64 / self.fps)
    }
}

/// Output locations for `clip` inside `output_dir`.
pub fn output_paths(clip: &Path, output_dir: &Path) -> (PathBuf, PathBuf) {
    let base = clip
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "clip".to_string());
    (
        output_dir.join(format!("{base}_annotated.{CLIP_EXTENSION}")),
        output_dir.join(format!("{base}_summary.txt")),
    )
}

/// Called with the number of frames written so far.
pub type ProgressHook = Box<dyn Fn(u64) + Send>;

pub struct DetectionTrackingPipeline<D, T> {
    detector: D,
    tracker: T,
    config: AnalysisConfig,
    progress: Option<ProgressHook>,
}

impl<D: ObjectDetector, T: Tracker> DetectionTrackingPipeline<D, T> {
    pub fn new(detector: D, tracker: T, config: AnalysisConfig) -> Self {
        Self {
            detector,
            tracker,
            config,
            progress: None,
        }
    }

    pub fn with_progress(mut self, hook: impl Fn(u64) + Send + 'static) -> Self {
        self.progress = Some(Box::new(hook));
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyze one finished clip.
    ///
    /// Outputs are written under hidden `.partial` names and renamed into
    /// place only once both are complete. On error the partials are removed;
    /// outputs of an earlier run of the same clip are left alone.
    pub fn analyze(&mut self, clip: &Path) -> Result<AnalysisOutput> {
        let output_dir = self.config.output_dir.clone();
        fs::create_dir_all(&output_dir)
            .with_context(|| format!("failed to create output dir {}", output_dir.display()))?;
        let (annotated_path, summary_path) = output_paths(clip, &output_dir);
        let annotated_partial = partial_path(&annotated_path);
        let summary_partial = partial_path(&summary_path);

        let mut placed = false;
        let result = self
            .run(clip, &annotated_partial, &summary_partial)
            .and_then(|mut output| {
                rename(&annotated_partial, &annotated_path)?;
                placed = true;
                rename(&summary_partial, &summary_path)?;
                output.annotated_path = annotated_path.clone();
                output.summary_path = summary_path.clone();
                Ok(output)
            });
        if result.is_err() {
            let _ = fs::remove_file(&annotated_partial);
            let _ = fs::remove_file(&summary_partial);
            if placed {
                let _ = fs::remove_file(&annotated_path);
            }
        }
        result.with_context(|| format!("analysis of {} failed", clip.display()))
    }

    fn run(
        &mut self,
        clip: &Path,
        annotated_partial: &Path,
        summary_partial: &Path,
    ) -> Result<AnalysisOutput> {
        self.tracker.reset();
        self.detector.reset();

        let mut reader = Y4mReader::open(clip)?;
        let (width, height) = (reader.width(), reader.height());
        let rate = reader.header().rate;
        let mut writer = Y4mWriter::create(annotated_partial, width, height, rate)?;
        let mut summary = SummaryRecord::new();

        log::info!(
            "analyzing {} ({}x{} @ {:.2} fps) with {}/{}",
            clip.display(),
            width,
            height,
            rate.as_f64(),
            self.detector.name(),
            self.tracker.name()
        );

        while let Some(mut frame) = reader.read_frame()? {
            let detections: Vec<Detection> = self
                .detector
                .detect(&frame)
                .with_context(|| format!("detector failed on frame {}", frame.index))?
                .into_iter()
                .filter(|d| self.config.accepts(d))
                .collect();
            let tracks = self
                .tracker
                .update(&detections)
                .with_context(|| format!("tracker failed on frame {}", frame.index))?;
            for track in tracks.iter().filter(|t| t.is_confirmed()) {
                if summary.record_first(track, frame.timestamp) {
                    log::debug!(
                        "track {} ({}) first confirmed at frame {}",
                        track.id,
                        track.label,
                        frame.index
                    );
                }
                draw_track(frame.pixels_mut(), &track.bbox, track.id);
            }
            writer.write_frame(&frame)?;
            if let Some(progress) = &self.progress {
                progress(writer.frames_written());
            }
        }

        let frames = writer.frames_written();
        if frames != reader.frames_read() {
            return Err(anyhow!(
                "wrote {} frames for {} read",
                frames,
                reader.frames_read()
            ));
        }
        let file = writer.finish()?;
        file.sync_all()
            .with_context(|| format!("failed to sync {}", annotated_partial.display()))?;
        drop(file);

        write_summary(summary_partial, &summary)?;
        log::info!(
            "{}: {} frames, {} tracked object(s)",
            clip.display(),
            frames,
            summary.len()
        );

        Ok(AnalysisOutput {
            clip: clip.to_path_buf(),
            annotated_path: annotated_partial.to_path_buf(),
            summary_path: summary_partial.to_path_buf(),
            frames,
            fps: rate.as_f64(),
            width,
            height,
            entries: summary.into_entries(),
        })
    }
}

fn write_summary(path: &Path, summary: &SummaryRecord) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for line in summary.lines() {
        writeln!(out, "{line}").with_context(|| format!("failed to write {}", path.display()))?;
    }
    let file = out
        .into_inner()
        .map_err(|err| err.into_error())
        .with_context(|| format!("failed to flush {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to sync {}", path.display()))
}

fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.partial"))
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to)
        .with_context(|| format!("failed to rename {} to {}", from.display(), to.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;

    fn det(confidence: f32, label: &str) -> Detection {
        Detection::new(BoundingBox::new(0, 0, 4, 4), confidence, label)
    }

    #[test]
    fn filter_rounds_confidence_up() {
        let config = AnalysisConfig::default();
        assert!(config.accepts(&det(0.621, "person")));
        assert!(config.accepts(&det(0.63, "cat")));
        assert!(!config.accepts(&det(0.62, "person")));
        assert!(!config.accepts(&det(0.99, "car")));
    }

    #[test]
    fn output_names_follow_clip() {
        let (annotated, summary) =
            output_paths(Path::new("/clips/20240101_120000_cam0.y4m"), Path::new("/out"));
        assert_eq!(
            annotated,
            PathBuf::from("/out/20240101_120000_cam0_annotated.y4m")
        );
        assert_eq!(summary, PathBuf::from("/out/20240101_120000_cam0_summary.txt"));
        assert_eq!(
            partial_path(&summary),
            PathBuf::from("/out/.20240101_120000_cam0_summary.txt.partial")
        );
    }
}

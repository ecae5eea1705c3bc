use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analysis::AnalysisConfig;
use crate::detect::{DetectorConfig, DetectorKind};
use crate::ingest::SourceConfig;
use crate::motion::{MotionConfig, MotionFileConfig};
use crate::record::{RecorderConfig, StopPolicy};
use crate::track::TrackerConfig;
use crate::transport::{FootageStore, HttpFootageStore, DEFAULT_API_URL};
use crate::video::{FfmpegTranscoder, Transcoder};

const DEFAULT_QUARANTINE_DIR: &str = "data/quarantine";
const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize, Default)]
struct SentinelConfigFile {
    capture: Option<CaptureConfigFile>,
    motion: Option<MotionFileConfig>,
    recording: Option<RecordingConfigFile>,
    analysis: Option<AnalysisConfigFile>,
    tracker: Option<TrackerConfig>,
    transcode: Option<TranscodeConfigFile>,
    api: Option<ApiConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    source: Option<String>,
    stream_id: Option<String>,
    fps: Option<f64>,
    width: Option<u32>,
    height: Option<u32>,
    detect_on_start: Option<bool>,
    ffmpeg_bin: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RecordingConfigFile {
    debounce_frames: Option<u32>,
    max_clip_secs: Option<f64>,
    staging_dir: Option<PathBuf>,
    clips_dir: Option<PathBuf>,
    stop_policy: Option<StopPolicy>,
}

#[derive(Debug, Deserialize, Default)]
struct AnalysisConfigFile {
    output_dir: Option<PathBuf>,
    quarantine_dir: Option<PathBuf>,
    min_confidence: Option<f32>,
    allowed_classes: Option<Vec<String>>,
    detector: Option<DetectorKind>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    motion_label: Option<String>,
    motion_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct TranscodeConfigFile {
    enabled: Option<bool>,
    ffmpeg_bin: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    enabled: Option<bool>,
    url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub source: SourceConfig,
    /// Run motion detection as soon as the capture loop starts.
    pub detect_on_start: bool,
    pub motion: MotionConfig,
    pub recording: RecorderConfig,
    pub analysis: AnalysisConfig,
    /// Failed clips are moved here; `None` leaves them in place.
    pub quarantine_dir: Option<PathBuf>,
    pub detector: DetectorConfig,
    pub tracker: TrackerConfig,
    pub transcode: TranscodeSettings,
    pub api: ApiSettings,
}

#[derive(Debug, Clone)]
pub struct TranscodeSettings {
    pub enabled: bool,
    pub ffmpeg_bin: String,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub enabled: bool,
    pub url: String,
    pub timeout: Duration,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        // The empty file maps every field to its default.
        Self::from_file(SentinelConfigFile::default())
    }
}

impl SentinelConfig {
    /// Load from `SENTINEL_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => SentinelConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentinelConfigFile) -> Self {
        let capture = file.capture.unwrap_or_default();
        let source_defaults = SourceConfig::default();
        let source = SourceConfig {
            uri: capture.source.unwrap_or(source_defaults.uri),
            target_fps: capture.fps.unwrap_or(source_defaults.target_fps),
            width: capture.width.unwrap_or(source_defaults.width),
            height: capture.height.unwrap_or(source_defaults.height),
            ffmpeg_bin: capture
                .ffmpeg_bin
                .clone()
                .unwrap_or(source_defaults.ffmpeg_bin),
        };

        let motion = file.motion.unwrap_or_default().into_config();

        let recording_file = file.recording.unwrap_or_default();
        let recorder_defaults = RecorderConfig::default();
        let recording = RecorderConfig {
            stream_id: capture.stream_id.unwrap_or(recorder_defaults.stream_id),
            debounce_frames: recording_file
                .debounce_frames
                .unwrap_or(recorder_defaults.debounce_frames),
            max_duration: recording_file
                .max_clip_secs
                .filter(|secs| secs.is_finite() && *secs > 0.0)
                .map(Duration::from_secs_f64)
                .unwrap_or(recorder_defaults.max_duration),
            staging_dir: recording_file
                .staging_dir
                .unwrap_or(recorder_defaults.staging_dir),
            clips_dir: recording_file
                .clips_dir
                .unwrap_or(recorder_defaults.clips_dir),
            stop_policy: recording_file
                .stop_policy
                .unwrap_or(recorder_defaults.stop_policy),
            fps: source.target_fps,
        };

        let analysis_file = file.analysis.unwrap_or_default();
        let analysis_defaults = AnalysisConfig::default();
        let analysis = AnalysisConfig {
            output_dir: analysis_file
                .output_dir
                .unwrap_or(analysis_defaults.output_dir),
            min_confidence: analysis_file
                .min_confidence
                .unwrap_or(analysis_defaults.min_confidence),
            allowed_classes: analysis_file
                .allowed_classes
                .unwrap_or(analysis_defaults.allowed_classes),
        };
        let quarantine_dir = Some(
            analysis_file
                .quarantine_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_QUARANTINE_DIR)),
        );

        let detector_defaults = DetectorConfig::default();
        let detector = DetectorConfig {
            kind: analysis_file.detector.unwrap_or(detector_defaults.kind),
            motion_label: analysis_file
                .motion_label
                .unwrap_or(detector_defaults.motion_label),
            motion_confidence: analysis_file
                .motion_confidence
                .unwrap_or(detector_defaults.motion_confidence),
            motion: motion.clone(),
            model_path: analysis_file.model_path,
            input_size: analysis_file
                .input_size
                .unwrap_or(detector_defaults.input_size),
        };

        let transcode_file = file.transcode.unwrap_or_default();
        let transcode = TranscodeSettings {
            enabled: transcode_file.enabled.unwrap_or(true),
            ffmpeg_bin: transcode_file
                .ffmpeg_bin
                .or(capture.ffmpeg_bin)
                .unwrap_or_else(|| "ffmpeg".to_string()),
        };

        let api_file = file.api.unwrap_or_default();
        let api = ApiSettings {
            enabled: api_file.enabled.unwrap_or(true),
            url: api_file
                .url
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            timeout: Duration::from_secs(
                api_file.timeout_secs.unwrap_or(DEFAULT_API_TIMEOUT_SECS),
            ),
        };

        Self {
            source,
            detect_on_start: capture.detect_on_start.unwrap_or(true),
            motion,
            recording,
            analysis,
            quarantine_dir,
            detector,
            tracker: file.tracker.unwrap_or_default(),
            transcode,
            api,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(source) = env_string("SENTINEL_SOURCE") {
            self.source.uri = source;
        }
        if let Some(stream_id) = env_string("SENTINEL_STREAM_ID") {
            self.recording.stream_id = stream_id;
        }
        if let Some(fps) = env_string("SENTINEL_FPS") {
            let fps: f64 = fps
                .parse()
                .map_err(|_| anyhow!("SENTINEL_FPS must be a number"))?;
            self.source.target_fps = fps;
            self.recording.fps = fps;
        }
        if let Some(dir) = env_string("SENTINEL_CLIPS_DIR") {
            self.recording.clips_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("SENTINEL_STAGING_DIR") {
            self.recording.staging_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("SENTINEL_ANALYSES_DIR") {
            self.analysis.output_dir = PathBuf::from(dir);
        }
        if let Some(url) = env_string("SENTINEL_API_URL") {
            self.api.url = url;
        }
        if let Some(value) = env_string("SENTINEL_MIN_CONFIDENCE") {
            self.analysis.min_confidence = value
                .parse()
                .map_err(|_| anyhow!("SENTINEL_MIN_CONFIDENCE must be a number"))?;
        }
        if let Some(value) = env_string("SENTINEL_DEBOUNCE_FRAMES") {
            self.recording.debounce_frames = value
                .parse()
                .map_err(|_| anyhow!("SENTINEL_DEBOUNCE_FRAMES must be an integer"))?;
        }
        if let Some(value) = env_string("SENTINEL_MAX_CLIP_SECS") {
            let secs: f64 = value
                .parse()
                .map_err(|_| anyhow!("SENTINEL_MAX_CLIP_SECS must be a number of seconds"))?;
            if !secs.is_finite() || secs <= 0.0 {
                return Err(anyhow!("SENTINEL_MAX_CLIP_SECS must be greater than zero"));
            }
            self.recording.max_duration = Duration::from_secs_f64(secs);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if !self.source.target_fps.is_finite() || self.source.target_fps <= 0.0 {
            return Err(anyhow!("capture.fps must be greater than zero"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("capture.width and capture.height must be non-zero"));
        }
        self.recording.stream_id = self.recording.stream_id.trim().to_string();
        if self.recording.stream_id.is_empty() {
            return Err(anyhow!("capture.stream_id must not be empty"));
        }
        if self.recording.max_duration.is_zero() {
            return Err(anyhow!("recording.max_clip_secs must be greater than zero"));
        }
        if self.motion.kernel_size == 0 {
            return Err(anyhow!("motion.kernel_size must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.motion.nms_overlap) {
            return Err(anyhow!("motion.nms_overlap must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.analysis.min_confidence) {
            return Err(anyhow!("analysis.min_confidence must be within [0, 1]"));
        }
        self.analysis.allowed_classes = self
            .analysis
            .allowed_classes
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        if self.analysis.allowed_classes.is_empty() {
            return Err(anyhow!("analysis.allowed_classes must not be empty"));
        }
        if self.detector.kind == DetectorKind::Tract && self.detector.model_path.is_none() {
            return Err(anyhow!("analysis.model_path is required for the tract detector"));
        }
        if self.tracker.n_init == 0 {
            return Err(anyhow!("tracker.n_init must be greater than zero"));
        }
        if self.api.enabled && self.api.url.trim().is_empty() {
            return Err(anyhow!("api.url must not be empty when the api is enabled"));
        }
        Ok(())
    }

    /// The configured transcoder, if transcoding is enabled.
    pub fn transcoder(&self) -> Option<Box<dyn Transcoder>> {
        self.transcode.enabled.then(|| {
            Box::new(FfmpegTranscoder::new(&self.transcode.ffmpeg_bin)) as Box<dyn Transcoder>
        })
    }

    /// The configured footage store, if uploads are enabled.
    pub fn footage_store(&self) -> Option<Box<dyn FootageStore>> {
        self.api.enabled.then(|| {
            Box::new(HttpFootageStore::new(&self.api.url, self.api.timeout))
                as Box<dyn FootageStore>
        })
    }
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_constants() {
        let cfg = SentinelConfig::default();
        assert_eq!(cfg.recording.debounce_frames, 30);
        assert_eq!(cfg.recording.max_duration, Duration::from_secs(10));
        assert_eq!(cfg.analysis.min_confidence, 0.63);
        assert_eq!(cfg.motion.nms_overlap, 0.3);
        assert_eq!(cfg.api.url, "http://127.0.0.1:5001/api");
        assert_eq!(cfg.recording.fps, cfg.source.target_fps);
    }

    #[test]
    fn validate_rejects_empty_classes() {
        let mut cfg = SentinelConfig::default();
        cfg.analysis.allowed_classes = vec![" ".to_string()];
        assert!(cfg.validate().is_err());
    }
}

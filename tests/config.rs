use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use clip_sentinel::config::SentinelConfig;
use clip_sentinel::detect::DetectorKind;
use clip_sentinel::record::StopPolicy;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SENTINEL_CONFIG",
        "SENTINEL_SOURCE",
        "SENTINEL_STREAM_ID",
        "SENTINEL_FPS",
        "SENTINEL_CLIPS_DIR",
        "SENTINEL_STAGING_DIR",
        "SENTINEL_ANALYSES_DIR",
        "SENTINEL_API_URL",
        "SENTINEL_MIN_CONFIDENCE",
        "SENTINEL_DEBOUNCE_FRAMES",
        "SENTINEL_MAX_CLIP_SECS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "capture": {
            "source": "rtsp://camera-1/stream",
            "stream_id": "porch",
            "fps": 15,
            "width": 800,
            "height": 600,
            "detect_on_start": false
        },
        "motion": { "min_area": 800, "kernel_shape": "rect" },
        "recording": {
            "debounce_frames": 10,
            "max_clip_secs": 20,
            "clips_dir": "/var/lib/sentinel/clips",
            "stop_policy": "finalize"
        },
        "analysis": {
            "min_confidence": 0.5,
            "allowed_classes": ["Person"],
            "quarantine_dir": "/var/lib/sentinel/bad"
        },
        "tracker": { "n_init": 2 },
        "transcode": { "enabled": false },
        "api": { "url": "http://catalogue:5001/api", "timeout_secs": 5 }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("SENTINEL_CONFIG", file.path());
    std::env::set_var("SENTINEL_STREAM_ID", "garage");
    std::env::set_var("SENTINEL_MAX_CLIP_SECS", "12.5");
    std::env::set_var("SENTINEL_ANALYSES_DIR", "/tmp/analyses");

    let cfg = SentinelConfig::load().expect("load config");

    assert_eq!(cfg.source.uri, "rtsp://camera-1/stream");
    assert_eq!(cfg.source.target_fps, 15.0);
    assert_eq!((cfg.source.width, cfg.source.height), (800, 600));
    assert!(!cfg.detect_on_start);
    assert_eq!(cfg.motion.min_area, 800.0);
    assert_eq!(cfg.detector.motion.min_area, 800.0);
    assert_eq!(cfg.recording.stream_id, "garage");
    assert_eq!(cfg.recording.debounce_frames, 10);
    assert_eq!(cfg.recording.max_duration, Duration::from_millis(12_500));
    assert_eq!(cfg.recording.clips_dir, PathBuf::from("/var/lib/sentinel/clips"));
    assert_eq!(cfg.recording.stop_policy, StopPolicy::Finalize);
    assert_eq!(cfg.recording.fps, 15.0);
    assert_eq!(cfg.analysis.min_confidence, 0.5);
    assert_eq!(cfg.analysis.allowed_classes, vec!["person"]);
    assert_eq!(cfg.analysis.output_dir, PathBuf::from("/tmp/analyses"));
    assert_eq!(cfg.quarantine_dir, Some(PathBuf::from("/var/lib/sentinel/bad")));
    assert_eq!(cfg.detector.kind, DetectorKind::Motion);
    assert_eq!(cfg.tracker.n_init, 2);
    assert_eq!(cfg.tracker.max_age, 30);
    assert!(cfg.transcoder().is_none());
    assert_eq!(cfg.api.url, "http://catalogue:5001/api");
    assert_eq!(cfg.api.timeout, Duration::from_secs(5));

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
[capture]
source = "stub://yard?object=1-3&duration=5"

[recording]
debounce_frames = 3

[api]
enabled = false
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    let cfg = SentinelConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.source.uri, "stub://yard?object=1-3&duration=5");
    assert_eq!(cfg.recording.debounce_frames, 3);
    assert_eq!(cfg.recording.max_duration, Duration::from_secs(10));
    assert!(cfg.footage_store().is_none());
}

#[test]
fn defaults_without_a_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = SentinelConfig::load().expect("load config");
    assert_eq!(cfg.source.uri, "stub://scene");
    assert_eq!(cfg.recording.debounce_frames, 30);
    assert_eq!(cfg.recording.max_duration, Duration::from_secs(10));
    assert_eq!(cfg.analysis.min_confidence, 0.63);
    assert_eq!(cfg.analysis.allowed_classes, vec!["person", "dog", "cat"]);
    assert_eq!(cfg.api.url, "http://127.0.0.1:5001/api");
}

#[test]
fn rejects_invalid_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SENTINEL_FPS", "fast");
    assert!(SentinelConfig::load().is_err());
    clear_env();

    std::env::set_var("SENTINEL_MAX_CLIP_SECS", "0");
    assert!(SentinelConfig::load().is_err());
    clear_env();

    std::env::set_var("SENTINEL_MIN_CONFIDENCE", "1.5");
    assert!(SentinelConfig::load().is_err());
    clear_env();
}

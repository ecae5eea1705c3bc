//! H.264/AAC re-encoding through an `ffmpeg` subprocess.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Re-encodes a finished video into a distributable file.
pub trait Transcoder: Send {
    fn name(&self) -> &'static str;

    /// Encode `input` into `output`, replacing any existing file.
    fn transcode(&self, input: &Path, output: &Path) -> Result<()>;
}

/// `<stem>_r.mp4` next to the original, with a trailing `_annotated` dropped
/// so the encoded file carries the clip's own name.
pub fn transcoded_path(annotated: &Path) -> PathBuf {
    let stem = annotated
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = stem.strip_suffix("_annotated").unwrap_or(&stem);
    annotated.with_file_name(format!("{base}_r.mp4"))
}

#[derive(Clone, Debug)]
pub struct FfmpegTranscoder {
    binary: PathBuf,
    crf: u8,
    preset: String,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            crf: 23,
            preset: "fast".to_string(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn command(&self, input: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-hide_banner")
            .arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-c:v")
            .arg("libx264")
            .arg("-crf")
            .arg(self.crf.to_string())
            .arg("-preset")
            .arg(&self.preset)
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg("-c:a")
            .arg("aac")
            .arg("-b:a")
            .arg("128k")
            .arg(output);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }
}

impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn transcode(&self, input: &Path, output: &Path) -> Result<()> {
        log::debug!(
            "transcoding {} -> {} with {}",
            input.display(),
            output.display(),
            self.binary.display()
        );
        let result = self
            .command(input, output)
            .output()
            .with_context(|| format!("failed to run {}", self.binary.display()))?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(anyhow!(
                "{} exited with {} while encoding {}: {}",
                self.binary.display(),
                result.status,
                input.display(),
                stderr.trim()
            ));
        }
        Ok(())
    }
}

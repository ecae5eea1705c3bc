//! Live frame source backed by an `ffmpeg` subprocess.
//!
//! ffmpeg decodes the camera (V4L2 device, RTSP/HTTP stream or a file), scales
//! to the configured size and rate and pipes YUV4MPEG2 to stdout. Timestamps
//! are wall-clock offsets from `connect`.

use anyhow::{anyhow, Context, Result};
use std::io::BufReader;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use super::{FrameSource, SourceConfig, SourceStats};
use crate::frame::Frame;
use crate::video::{FrameRate, Y4mReader};

pub struct FfmpegSource {
    config: SourceConfig,
    child: Option<Child>,
    reader: Option<Y4mReader<BufReader<ChildStdout>>>,
    frame_count: u64,
    connected_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

impl FfmpegSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            child: None,
            reader: None,
            frame_count: 0,
            connected_at: None,
            last_frame_at: None,
            last_error: None,
        }
    }

    fn command(&self) -> Result<Command> {
        let rate = FrameRate::from_fps(self.config.target_fps)?;
        let uri = self.config.uri.as_str();
        let mut cmd = Command::new(&self.config.ffmpeg_bin);
        cmd.arg("-hide_banner").arg("-loglevel").arg("error");
        if uri.starts_with("/dev/video") {
            cmd.arg("-f").arg("v4l2");
        } else if uri.starts_with("rtsp://") {
            cmd.arg("-rtsp_transport").arg("tcp");
        }
        cmd.arg("-i")
            .arg(uri)
            .arg("-an")
            .arg("-vf")
            .arg(format!("scale={}:{}", self.config.width, self.config.height))
            .arg("-r")
            .arg(format!("{}/{}", rate.num, rate.den))
            .arg("-pix_fmt")
            .arg("yuv444p")
            .arg("-f")
            .arg("yuv4mpegpipe")
            .arg("-");
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        Ok(cmd)
    }

    fn health_grace(&self) -> Duration {
        let frame_ms = (1000.0 / self.config.target_fps.max(0.001)) as u64;
        Duration::from_millis(frame_ms.saturating_mul(6).max(2_000))
    }

    fn fail(&mut self, message: String) -> anyhow::Error {
        self.last_error = Some(message.clone());
        anyhow!(message)
    }
}

impl FrameSource for FfmpegSource {
    fn connect(&mut self) -> Result<()> {
        self.close();
        let mut child = self
            .command()?
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.config.ffmpeg_bin))?;
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(anyhow!("failed to capture ffmpeg stdout"));
            }
        };
        let reader = match Y4mReader::new(BufReader::new(stdout)) {
            Ok(reader) => reader,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err.context(format!("ffmpeg produced no stream for {}", self.config.uri)));
            }
        };
        if (reader.width(), reader.height()) != (self.config.width, self.config.height) {
            log::warn!(
                "FfmpegSource: {} delivers {}x{}, expected {}x{}",
                self.config.uri,
                reader.width(),
                reader.height(),
                self.config.width,
                self.config.height
            );
        }
        log::info!("FfmpegSource: connected to {} (ffmpeg)", self.config.uri);
        self.child = Some(child);
        self.reader = Some(reader);
        self.connected_at = Some(Instant::now());
        self.last_frame_at = None;
        self.last_error = None;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(anyhow!("ffmpeg source {} is not connected", self.config.uri));
        };
        let Some(started) = self.connected_at else {
            return Err(anyhow!("ffmpeg source {} is not connected", self.config.uri));
        };
        match reader.read_frame() {
            Ok(Some(mut frame)) => {
                frame.timestamp = started.elapsed();
                self.frame_count += 1;
                self.last_frame_at = Some(Instant::now());
                Ok(Some(frame))
            }
            Ok(None) => {
                log::info!("FfmpegSource: {} reached end of stream", self.config.uri);
                Ok(None)
            }
            Err(err) => Err(self.fail(format!("ffmpeg stream broke: {err:#}"))),
        }
    }

    fn frame_rate(&self) -> f64 {
        self.config.target_fps
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() || self.reader.is_none() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            uri: self.config.uri.clone(),
        }
    }

    fn close(&mut self) {
        self.reader = None;
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.kill() {
                log::debug!("ffmpeg already exited: {err}");
            }
            let _ = child.wait();
            log::debug!("FfmpegSource: closed {}", self.config.uri);
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.close();
    }
}

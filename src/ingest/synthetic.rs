//! Synthetic scene source (`stub://`).
//!
//! Renders a flat background with an optional bright square that bounces
//! horizontally while it is visible. Fully deterministic, so tests can reason
//! about exactly which frames contain motion.
//!
//! URI parameters: `stub://<name>?object=<from>-<until>&duration=<secs>`,
//! times in seconds.

use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use std::time::Duration;

use super::{FrameSource, SourceConfig, SourceStats};
use crate::frame::{frame_timestamp, Frame};

#[derive(Clone, Debug, PartialEq)]
pub struct MovingObject {
    /// Side of the square in pixels.
    pub size: u32,
    /// Horizontal travel per frame.
    pub speed_px: u32,
    pub level: u8,
    pub visible_from: Duration,
    pub visible_until: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticScene {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// `None` runs forever.
    pub duration: Option<Duration>,
    pub background: u8,
    pub object: Option<MovingObject>,
}

impl SyntheticScene {
    pub fn static_scene(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            fps,
            duration: None,
            background: 40,
            object: None,
        }
    }

    pub fn frame_count(&self) -> Option<u64> {
        self.duration
            .map(|d| (d.as_secs_f64() * self.fps).round() as u64)
    }

    /// Render frame `index`.
    pub fn render(&self, index: u64) -> Frame {
        let timestamp = frame_timestamp(index, self.fps);
        let mut pixels = RgbImage::from_pixel(
            self.width,
            self.height,
            Rgb([self.background; 3]),
        );
        if let Some(object) = &self.object {
            if timestamp >= object.visible_from && timestamp < object.visible_until {
                let size = object.size.min(self.width).min(self.height);
                let x0 = bounce(index, object.speed_px, self.width - size);
                let y0 = (self.height - size) / 2;
                for y in y0..y0 + size {
                    for x in x0..x0 + size {
                        pixels.put_pixel(x, y, Rgb([object.level; 3]));
                    }
                }
            }
        }
        Frame::new(pixels, index, timestamp)
    }

    fn parse_uri(uri: &str, config: &SourceConfig) -> Result<Self> {
        let mut scene = Self::static_scene(config.width, config.height, config.target_fps);
        let Some((_, query)) = uri.split_once('?') else {
            return Ok(scene);
        };
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "duration" => {
                    let secs: f64 = value
                        .parse()
                        .with_context(|| format!("invalid stub duration '{value}'"))?;
                    scene.duration = Some(seconds(secs)?);
                }
                "object" => {
                    let (from, until) = value
                        .split_once('-')
                        .ok_or_else(|| anyhow!("stub object must be <from>-<until>"))?;
                    let from: f64 = from.parse().context("invalid stub object start")?;
                    let until: f64 = until.parse().context("invalid stub object end")?;
                    let size = (config.height / 4).max(1);
                    scene.object = Some(MovingObject {
                        size,
                        speed_px: (size / 4).max(1),
                        level: 220,
                        visible_from: seconds(from)?,
                        visible_until: seconds(until)?,
                    });
                }
                other => log::warn!("ignoring unknown stub parameter '{other}'"),
            }
        }
        Ok(scene)
    }
}

fn seconds(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| anyhow!("invalid duration {secs}"))
}

/// Triangle wave over `0..=travel`.
fn bounce(index: u64, speed: u32, travel: u32) -> u32 {
    if travel == 0 {
        return 0;
    }
    let period = 2 * travel as u64;
    let pos = (index * speed as u64) % period;
    if pos <= travel as u64 {
        pos as u32
    } else {
        (period - pos) as u32
    }
}

pub struct SyntheticSource {
    uri: String,
    scene: SyntheticScene,
    next_index: u64,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(uri: impl Into<String>, scene: SyntheticScene) -> Self {
        Self {
            uri: uri.into(),
            scene,
            next_index: 0,
            connected: false,
        }
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let scene = SyntheticScene::parse_uri(&config.uri, config)?;
        Ok(Self::new(config.uri.clone(), scene))
    }

    pub fn scene(&self) -> &SyntheticScene {
        &self.scene
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("SyntheticSource: connected to {}", self.uri);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("synthetic source {} is not connected", self.uri));
        }
        if let Some(total) = self.scene.frame_count() {
            if self.next_index >= total {
                return Ok(None);
            }
        }
        let frame = self.scene.render(self.next_index);
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn frame_rate(&self) -> f64 {
        self.scene.fps
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.next_index,
            uri: self.uri.clone(),
        }
    }

    fn close(&mut self) {
        self.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(uri: &str) -> SourceConfig {
        SourceConfig {
            uri: uri.to_string(),
            target_fps: 10.0,
            width: 160,
            height: 120,
            ..SourceConfig::default()
        }
    }

    #[test]
    fn parses_object_window_and_duration() -> Result<()> {
        let source = SyntheticSource::from_config(&stub_config("stub://cam?object=2-9&duration=12"))?;
        let scene = source.scene();
        assert_eq!(scene.duration, Some(Duration::from_secs(12)));
        let object = scene.object.as_ref().ok_or_else(|| anyhow!("no object"))?;
        assert_eq!(object.visible_from, Duration::from_secs(2));
        assert_eq!(object.visible_until, Duration::from_secs(9));
        assert_eq!(scene.frame_count(), Some(120));
        Ok(())
    }

    #[test]
    fn stream_ends_after_duration() -> Result<()> {
        let mut source = SyntheticSource::from_config(&stub_config("stub://cam?duration=1"))?;
        source.connect()?;
        let mut frames = 0;
        while let Some(frame) = source.next_frame()? {
            assert_eq!(frame.index, frames);
            frames += 1;
        }
        assert_eq!(frames, 10);
        assert_eq!(source.stats().frames_captured, 10);
        Ok(())
    }

    #[test]
    fn object_only_drawn_inside_window() {
        let scene = SyntheticScene {
            object: Some(MovingObject {
                size: 20,
                speed_px: 5,
                level: 220,
                visible_from: Duration::from_secs(1),
                visible_until: Duration::from_secs(2),
            }),
            ..SyntheticScene::static_scene(100, 60, 10.0)
        };
        let bright = |f: &Frame| f.pixels().pixels().filter(|p| p.0[0] == 220).count();
        assert_eq!(bright(&scene.render(5)), 0);
        assert_eq!(bright(&scene.render(10)), 400);
        assert_eq!(bright(&scene.render(20)), 0);
    }

    #[test]
    fn bounce_stays_in_range() {
        for i in 0..100 {
            assert!(bounce(i, 7, 30) <= 30);
        }
        assert_eq!(bounce(5, 10, 30), 10);
        assert_eq!(bounce(0, 3, 0), 0);
    }

    #[test]
    fn unconnected_source_errors() {
        let mut source = SyntheticSource::new("stub://x", SyntheticScene::static_scene(8, 8, 5.0));
        assert!(source.next_frame().is_err());
    }
}

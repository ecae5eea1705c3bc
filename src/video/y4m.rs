//! YUV4MPEG2 clip container on top of the `y4m` codec.
//!
//! Clips are written as 8-bit 4:2:0 (`C420jpeg`, the layout `ffmpeg -f
//! yuv4mpegpipe` emits), with chroma averaged over each 2x2 block. The reader
//! accepts 8-bit 4:4:4, 4:2:2, 4:2:0 and mono streams and upsamples chroma by
//! pixel replication. Conversion is limited-range BT.601.

use anyhow::{anyhow, bail, Context, Result};
use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::frame::{frame_timestamp, Frame};

/// Rational frame rate as carried in the `F` header token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub fn new(num: u32, den: u32) -> Result<Self> {
        if num == 0 || den == 0 {
            bail!("invalid frame rate {}:{}", num, den);
        }
        Ok(Self { num, den })
    }

    /// Closest rational for `fps`: integer rates, NTSC-style `n/1001`, or
    /// millihertz precision.
    pub fn from_fps(fps: f64) -> Result<Self> {
        if !fps.is_finite() || fps <= 0.0 {
            bail!("invalid frame rate {}", fps);
        }
        for den in [1u32, 1001, 1000] {
            let num = (fps * den as f64).round();
            if num >= 1.0
                && num <= u32::MAX as f64
                && (num / den as f64 - fps).abs() < 1e-6 * fps.max(1.0)
            {
                return Self::new(num as u32, den);
            }
        }
        Self::new((fps * 1000.0).round().max(1.0) as u32, 1000)
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    fn ratio(&self) -> y4m::Ratio {
        y4m::Ratio::new(self.num as usize, self.den as usize)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Y4mHeader {
    pub width: u32,
    pub height: u32,
    pub rate: FrameRate,
}

fn codec_error(err: y4m::Error) -> anyhow::Error {
    anyhow!("y4m: {err:?}")
}

// ----------------------------------------------------------------------------
// Writer
// ----------------------------------------------------------------------------

pub struct Y4mWriter {
    encoder: y4m::Encoder<File>,
    file: File,
    width: u32,
    height: u32,
    rate: FrameRate,
    frames: u64,
    y_plane: Vec<u8>,
    u_plane: Vec<u8>,
    v_plane: Vec<u8>,
}

impl Y4mWriter {
    pub fn create(path: &Path, width: u32, height: u32, rate: FrameRate) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("cannot write {}x{} frames", width, height);
        }
        let file = File::create(path)
            .with_context(|| format!("failed to create clip {}", path.display()))?;
        let handle = file
            .try_clone()
            .with_context(|| format!("failed to open clip {}", path.display()))?;
        let encoder = y4m::encode(width as usize, height as usize, rate.ratio())
            .with_colorspace(y4m::Colorspace::C420jpeg)
            .write_header(handle)
            .map_err(codec_error)
            .with_context(|| format!("failed to write header of {}", path.display()))?;
        let (cw, ch) = chroma_dims(width, height);
        Ok(Self {
            encoder,
            file,
            width,
            height,
            rate,
            frames: 0,
            y_plane: Vec::with_capacity(width as usize * height as usize),
            u_plane: Vec::with_capacity(cw * ch),
            v_plane: Vec::with_capacity(cw * ch),
        })
    }

    pub fn rate(&self) -> FrameRate {
        self.rate
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.width() != self.width || frame.height() != self.height {
            bail!(
                "frame {} is {}x{}, clip is {}x{}",
                frame.index,
                frame.width(),
                frame.height(),
                self.width,
                self.height
            );
        }
        let (w, h) = (self.width as usize, self.height as usize);
        let (cw, ch) = chroma_dims(self.width, self.height);
        self.y_plane.clear();
        let mut u_sum = vec![0u32; cw * ch];
        let mut v_sum = vec![0u32; cw * ch];
        let mut count = vec![0u32; cw * ch];
        for (i, px) in frame.pixels().pixels().enumerate() {
            let (y, u, v) = rgb_to_yuv(px.0);
            self.y_plane.push(y);
            let at = (i / w / 2) * cw + (i % w) / 2;
            u_sum[at] += u as u32;
            v_sum[at] += v as u32;
            count[at] += 1;
        }
        debug_assert_eq!(self.y_plane.len(), w * h);
        self.u_plane.clear();
        self.v_plane.clear();
        for ((u, v), n) in u_sum.iter().zip(&v_sum).zip(&count) {
            let n = (*n).max(1);
            self.u_plane.push(((u + n / 2) / n) as u8);
            self.v_plane.push(((v + n / 2) / n) as u8);
        }
        let planes = y4m::Frame::new(
            [&self.y_plane[..], &self.u_plane[..], &self.v_plane[..]],
            None,
        );
        self.encoder
            .write_frame(&planes)
            .map_err(codec_error)
            .context("failed to write y4m frame")?;
        self.frames += 1;
        Ok(())
    }

    /// Close the encoder and hand back the file for syncing.
    pub fn finish(self) -> Result<File> {
        drop(self.encoder);
        Ok(self.file)
    }
}

fn chroma_dims(width: u32, height: u32) -> (usize, usize) {
    ((width as usize).div_ceil(2), (height as usize).div_ceil(2))
}

// ----------------------------------------------------------------------------
// Reader
// ----------------------------------------------------------------------------

/// Counts bytes pulled from the stream so a frame cut short can be told from
/// a clean end of stream.
struct Tally<R> {
    inner: R,
    bytes: Arc<AtomicU64>,
}

impl<R: Read> Read for Tally<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

pub struct Y4mReader<R: Read> {
    decoder: y4m::Decoder<Tally<R>>,
    bytes: Arc<AtomicU64>,
    header: Y4mHeader,
    next_index: u64,
}

impl Y4mReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open clip {}", path.display()))?;
        Self::new(BufReader::new(file))
            .with_context(|| format!("failed to read clip header of {}", path.display()))
    }
}

impl<R: Read> Y4mReader<R> {
    pub fn new(input: R) -> Result<Self> {
        let bytes = Arc::new(AtomicU64::new(0));
        let decoder = y4m::Decoder::new(Tally {
            inner: input,
            bytes: bytes.clone(),
        })
        .map_err(codec_error)
        .context("not a readable YUV4MPEG2 stream")?;
        if decoder.get_bytes_per_sample() != 1 {
            bail!(
                "unsupported y4m bit depth {} (8-bit only)",
                decoder.get_bit_depth()
            );
        }
        let (width, height) = (decoder.get_width(), decoder.get_height());
        if width == 0 || height == 0 {
            bail!("y4m frame size {}x{} is empty", width, height);
        }
        let ratio = decoder.get_framerate();
        let rate = FrameRate::new(
            u32::try_from(ratio.num).context("y4m frame rate out of range")?,
            u32::try_from(ratio.den).context("y4m frame rate out of range")?,
        )?;
        let header = Y4mHeader {
            width: u32::try_from(width).context("y4m width out of range")?,
            height: u32::try_from(height).context("y4m height out of range")?,
            rate,
        };
        Ok(Self {
            decoder,
            bytes,
            header,
            next_index: 0,
        })
    }

    pub fn header(&self) -> &Y4mHeader {
        &self.header
    }

    pub fn width(&self) -> u32 {
        self.header.width
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }

    pub fn fps(&self) -> f64 {
        self.header.rate.as_f64()
    }

    pub fn frames_read(&self) -> u64 {
        self.next_index
    }

    /// Next frame, `None` at a clean end of stream. A frame cut short is an
    /// error.
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        let before = self.bytes.load(Ordering::Relaxed);
        let Y4mHeader { width, height, .. } = self.header;
        let index = self.next_index;
        let rgb = match self.decoder.read_frame() {
            Ok(planes) => planes_to_rgb(
                width,
                height,
                planes.get_y_plane(),
                planes.get_u_plane(),
                planes.get_v_plane(),
            )?,
            Err(err) if is_end_of_stream(&err) => {
                if self.bytes.load(Ordering::Relaxed) == before {
                    return Ok(None);
                }
                bail!("y4m frame {} is truncated", index);
            }
            Err(err) => {
                return Err(codec_error(err).context(format!("failed to read y4m frame {index}")))
            }
        };
        self.next_index += 1;
        let frame = Frame::from_rgb(rgb, width, height, index, frame_timestamp(index, self.fps()))?;
        Ok(Some(frame))
    }
}

fn is_end_of_stream(err: &y4m::Error) -> bool {
    match err {
        y4m::Error::EOF => true,
        y4m::Error::IoError(io) => io.kind() == ErrorKind::UnexpectedEof,
        _ => false,
    }
}

/// Chroma subsampling inferred from the decoded plane sizes.
fn planes_to_rgb(width: u32, height: u32, y: &[u8], u: &[u8], v: &[u8]) -> Result<Vec<u8>> {
    let (w, h) = (width as usize, height as usize);
    if y.len() != w * h || u.len() != v.len() {
        bail!("y4m planes do not match a {}x{} frame", width, height);
    }
    let (half_w, half_h) = (w.div_ceil(2), h.div_ceil(2));
    let chroma_at: fn(usize, usize, usize) -> usize = match u.len() {
        0 => |_, _, _| usize::MAX,
        n if n == w * h => |row, col, w| row * w + col,
        n if n == half_w * h => |row, col, w| row * w.div_ceil(2) + col / 2,
        n if n == half_w * half_h => |row, col, w| (row / 2) * w.div_ceil(2) + col / 2,
        n => bail!("unsupported y4m chroma plane of {} samples", n),
    };
    let mut rgb = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        for col in 0..w {
            let at = chroma_at(row, col, w);
            let (cb, cr) = if at == usize::MAX {
                (128, 128)
            } else {
                (u[at], v[at])
            };
            rgb.extend_from_slice(&yuv_to_rgb(y[row * w + col], cb, cr));
        }
    }
    Ok(rgb)
}

fn rgb_to_yuv([r, g, b]: [u8; 3]) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (y as u8, u as u8, v as u8)
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}

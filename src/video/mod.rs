//! Clip container and re-encoding.

pub mod transcode;
pub mod y4m;

pub use transcode::{transcoded_path, FfmpegTranscoder, Transcoder};
pub use y4m::{FrameRate, Y4mHeader, Y4mReader, Y4mWriter};

/// Extension of recorded and annotated clips.
pub const CLIP_EXTENSION: &str = "y4m";

//! Frame sources.
//!
//! This module provides the video sources the sampler pulls from:
//! - Synthetic stream (`stub://WxH?frames=N&fps=F`), for demos and tests
//! - Directory of still frames (`.jpg`, `.jpeg`, `.png`), read in lexical order
//! - Local video files (feature: source-ffmpeg)
//!
//! Every source yields frames in order with a monotonically increasing index and
//! reports end-of-stream as `Ok(None)`. Sources decode in memory only.

pub mod image_dir;
pub mod synthetic;
#[cfg(feature = "source-ffmpeg")]
pub(crate) mod file_ffmpeg;

use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::frame::Frame;

pub use image_dir::ImageDirSource;
pub use synthetic::SyntheticSource;

/// Sequential frame decoder.
pub trait FrameSource {
    /// Open the underlying stream.
    fn connect(&mut self) -> Result<()>;

    /// Next decoded frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Native frame rate, when the source has timing information.
    fn fps(&self) -> Option<f64>;

    /// Frame dimensions, when known before the first frame is decoded.
    fn frame_size(&self) -> Option<(u32, u32)> {
        None
    }

    /// Release decoder resources. Called exactly once when sampling stops.
    fn close(&mut self) {}

    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_read: u64,
    pub source: String,
}

/// Where frames come from.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SourceConfig {
    /// `stub://...`, a directory of images, or a video file path.
    pub path: String,
    /// Nominal frame rate for sources without their own timing (image directories).
    #[serde(default)]
    pub fps: Option<f64>,
}

/// Pick a source implementation for a path.
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    let path = config.path.trim();
    if path.is_empty() {
        return Err(PipelineError::config("source path is empty"));
    }
    if path.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::from_url(path)?));
    }
    if path.contains("://") {
        return Err(PipelineError::config(format!(
            "unsupported source '{}': only local paths and stub:// are accepted",
            path
        )));
    }
    if std::path::Path::new(path).is_dir() {
        return Ok(Box::new(ImageDirSource::new(path, config.fps)?));
    }
    #[cfg(feature = "source-ffmpeg")]
    {
        Ok(Box::new(file_ffmpeg::FfmpegSource::new(path)?))
    }
    #[cfg(not(feature = "source-ffmpeg"))]
    {
        Err(PipelineError::config(format!(
            "video file '{}' requires the source-ffmpeg feature",
            path
        )))
    }
}

//! Decoded video frames.
//!
//! A `Frame` is produced by a source, handed to the sampler, and dropped once
//! its `FrameResult` exists. Pixels are RGB8, row-major, shared behind an `Arc`
//! so a detector running on a worker thread can hold them without a copy.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{PipelineError, Result};

#[derive(Clone)]
pub struct Frame {
    /// Position in the source stream, counting every decoded frame.
    pub index: u64,
    /// Time since the start of the stream.
    pub timestamp: Duration,
    pub width: u32,
    pub height: u32,
    pixels: Arc<[u8]>,
}

impl Frame {
    pub fn new(
        index: u64,
        timestamp: Duration,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PipelineError::source(format!(
                "frame {index} has empty dimensions {width}x{height}"
            )));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| PipelineError::source("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(PipelineError::source(format!(
                "frame {index}: expected {expected} RGB bytes, received {}",
                pixels.len()
            )));
        }
        Ok(Self {
            index,
            timestamp,
            width,
            height,
            pixels: pixels.into(),
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Copy into an `image` buffer for encoding or drawing.
    pub fn to_rgb_image(&self) -> image::RgbImage {
        image::RgbImage::from_fn(self.width, self.height, |x, y| {
            let idx = (y as usize * self.width as usize + x as usize) * 3;
            image::Rgb([self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]])
        })
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("timestamp", &self.timestamp)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

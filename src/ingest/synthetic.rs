//! Synthetic frame source (`stub://`).
//!
//! `stub://WIDTHxHEIGHT?frames=N&fps=F` yields `N` gradient frames at a nominal
//! `F` frames per second. Any other host (e.g. `stub://front_camera`) uses the
//! default 640x480 size.

use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::frame::Frame;

use super::{FrameSource, SourceStats};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FRAMES: u64 = 100;
const DEFAULT_FPS: f64 = 30.0;

pub struct SyntheticSource {
    url: String,
    width: u32,
    height: u32,
    total_frames: u64,
    fps: f64,
    frame_count: u64,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, total_frames: u64, fps: f64) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PipelineError::config("synthetic source needs non-zero dimensions"));
        }
        if !(fps.is_finite() && fps > 0.0) {
            return Err(PipelineError::config(format!(
                "synthetic source fps must be positive, got {fps}"
            )));
        }
        Ok(Self {
            url: format!("stub://{width}x{height}?frames={total_frames}&fps={fps}"),
            width,
            height,
            total_frames,
            fps,
            frame_count: 0,
            connected: false,
        })
    }

    pub fn from_url(raw: &str) -> Result<Self> {
        let url = url::Url::parse(raw)
            .map_err(|e| PipelineError::config(format!("invalid stub url '{raw}': {e}")))?;
        let (width, height) = url
            .host_str()
            .and_then(parse_dimensions)
            .unwrap_or((DEFAULT_WIDTH, DEFAULT_HEIGHT));
        let mut total_frames = DEFAULT_FRAMES;
        let mut fps = DEFAULT_FPS;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "frames" => {
                    total_frames = value.parse().map_err(|_| {
                        PipelineError::config(format!("stub frames must be an integer, got '{value}'"))
                    })?
                }
                "fps" => {
                    fps = value.parse().map_err(|_| {
                        PipelineError::config(format!("stub fps must be a number, got '{value}'"))
                    })?
                }
                other => log::warn!("SyntheticSource: ignoring unknown parameter '{}'", other),
            }
        }
        let mut source = Self::new(width, height, total_frames, fps)?;
        source.url = raw.to_string();
        Ok(source)
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let len = (self.width as usize) * (self.height as usize) * 3;
        (0..len)
            .map(|i| ((i as u64 + self.frame_count) % 256) as u8)
            .collect()
    }
}

fn parse_dimensions(host: &str) -> Option<(u32, u32)> {
    let (w, h) = host.split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("SyntheticSource: connected to {}", self.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(PipelineError::source("synthetic source not connected; call connect() first"));
        }
        if self.frame_count >= self.total_frames {
            return Ok(None);
        }
        let index = self.frame_count;
        let timestamp = Duration::from_secs_f64(index as f64 / self.fps);
        let frame = Frame::new(index, timestamp, self.width, self.height, self.generate_pixels())?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn fps(&self) -> Option<f64> {
        Some(self.fps)
    }

    fn frame_size(&self) -> Option<(u32, u32)> {
        Some((self.width, self.height))
    }

    fn close(&mut self) {
        self.connected = false;
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_read: self.frame_count,
            source: self.url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stub_url() {
        let source = SyntheticSource::from_url("stub://64x32?frames=5&fps=10").unwrap();
        assert_eq!(source.frame_size(), Some((64, 32)));
        assert_eq!(source.fps(), Some(10.0));
        assert_eq!(source.total_frames, 5);
    }

    #[test]
    fn named_stub_uses_defaults() {
        let source = SyntheticSource::from_url("stub://front_camera").unwrap();
        assert_eq!(source.frame_size(), Some((DEFAULT_WIDTH, DEFAULT_HEIGHT)));
        assert_eq!(source.total_frames, DEFAULT_FRAMES);
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(SyntheticSource::from_url("stub://8x8?frames=many").is_err());
        assert!(SyntheticSource::from_url("stub://8x8?fps=0").is_err());
    }

    #[test]
    fn yields_frames_until_exhausted() {
        let mut source = SyntheticSource::new(4, 4, 3, 2.0).unwrap();
        assert!(source.next_frame().is_err());
        source.connect().unwrap();
        let indices: Vec<u64> = std::iter::from_fn(|| source.next_frame().unwrap())
            .map(|f| f.index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(source.next_frame().unwrap().is_none());
        assert_eq!(source.stats().frames_read, 3);
    }

    #[test]
    fn timestamps_follow_fps() {
        let mut source = SyntheticSource::new(2, 2, 5, 2.0).unwrap();
        source.connect().unwrap();
        let mut last = None;
        while let Some(frame) = source.next_frame().unwrap() {
            last = Some(frame);
        }
        assert_eq!(last.unwrap().timestamp, Duration::from_secs(2));
    }
}

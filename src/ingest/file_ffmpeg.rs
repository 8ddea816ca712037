//! Local video file source using FFmpeg.
//!
//! Decodes the best video stream to RGB24 in memory. The native frame rate comes
//! from the stream's average frame rate; timestamps are derived from it.

use ffmpeg_next as ffmpeg;
use std::time::Duration;

use super::{FrameSource, SourceStats};
use crate::error::{PipelineError, Result};
use crate::frame::Frame;

pub(crate) struct FfmpegSource {
    path: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    fps: Option<f64>,
    frame_count: u64,
    eof_sent: bool,
}

impl FfmpegSource {
    pub(crate) fn new(path: &str) -> Result<Self> {
        ffmpeg::init().map_err(|e| PipelineError::source(format!("initialize ffmpeg: {e}")))?;
        let input = ffmpeg::format::input(&path)
            .map_err(|e| PipelineError::config(format!("failed to open video '{path}': {e}")))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| PipelineError::config(format!("'{path}' has no video track")))?;
        let stream_index = input_stream.index();
        let rate = f64::from(input_stream.avg_frame_rate());
        let fps = (rate.is_finite() && rate > 0.0).then_some(rate);
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .map_err(|e| PipelineError::source(format!("load video decoder parameters: {e}")))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| PipelineError::source(format!("open ffmpeg video decoder: {e}")))?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(|e| PipelineError::source(format!("create ffmpeg scaler: {e}")))?;

        Ok(Self {
            path: path.to_string(),
            input,
            stream_index,
            decoder,
            scaler,
            fps,
            frame_count: 0,
            eof_sent: false,
        })
    }

    fn receive(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb_frame)
            .map_err(|e| PipelineError::source(format!("scale frame to RGB: {e}")))?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;

        let index = self.frame_count;
        self.frame_count += 1;
        let timestamp = match self.fps {
            Some(fps) => Duration::from_secs_f64(index as f64 / fps),
            None => Duration::ZERO,
        };
        Frame::new(index, timestamp, width, height, pixels).map(Some)
    }
}

impl FrameSource for FfmpegSource {
    fn connect(&mut self) -> Result<()> {
        log::info!(
            "FfmpegSource: opened {} ({}x{}, fps {:?})",
            self.path,
            self.decoder.width(),
            self.decoder.height(),
            self.fps
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        // Frames already buffered in the decoder come first.
        if let Some(frame) = self.receive()? {
            return Ok(Some(frame));
        }
        if self.eof_sent {
            return Ok(None);
        }

        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .map_err(|e| PipelineError::source(format!("send packet to decoder: {e}")))?;
            if let Some(frame) = self.receive()? {
                return Ok(Some(frame));
            }
        }

        self.eof_sent = true;
        let _ = self.decoder.send_eof();
        self.receive()
    }

    fn fps(&self) -> Option<f64> {
        self.fps
    }

    fn frame_size(&self) -> Option<(u32, u32)> {
        Some((self.decoder.width(), self.decoder.height()))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_read: self.frame_count,
            source: self.path.clone(),
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok((data[..row_bytes * height as usize].to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .ok_or_else(|| PipelineError::source("ffmpeg frame row is out of bounds"))?,
        );
    }

    Ok((pixels, width, height))
}

//! Still-frame directory source.
//!
//! Frames are the `.jpg`, `.jpeg` and `.png` files of one directory in lexical
//! order, frame `i` being the `i`-th file. Files that fail to decode are skipped
//! with a warning; the index still advances so label files stay aligned.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::frame::Frame;

use super::{FrameSource, SourceStats};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub struct ImageDirSource {
    dir: PathBuf,
    fps: Option<f64>,
    files: Vec<PathBuf>,
    position: usize,
    frames_read: u64,
}

impl ImageDirSource {
    pub fn new(dir: impl AsRef<Path>, fps: Option<f64>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(PipelineError::config(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        if let Some(fps) = fps {
            if !(fps.is_finite() && fps > 0.0) {
                return Err(PipelineError::config(format!(
                    "image directory fps must be positive, got {fps}"
                )));
            }
        }
        Ok(Self {
            dir,
            fps,
            files: Vec::new(),
            position: 0,
            frames_read: 0,
        })
    }

    fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_image && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn timestamp(&self, index: u64) -> Duration {
        match self.fps {
            Some(fps) => Duration::from_secs_f64(index as f64 / fps),
            None => Duration::ZERO,
        }
    }
}

impl FrameSource for ImageDirSource {
    fn connect(&mut self) -> Result<()> {
        self.files = Self::list_images(&self.dir)?;
        self.position = 0;
        log::info!(
            "ImageDirSource: {} frames in {}",
            self.files.len(),
            self.dir.display()
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        while self.position < self.files.len() {
            let index = self.position as u64;
            let path = &self.files[self.position];
            self.position += 1;
            let rgb = match image::open(path) {
                Ok(img) => img.into_rgb8(),
                Err(err) => {
                    log::warn!("ImageDirSource: skipping {}: {}", path.display(), err);
                    continue;
                }
            };
            let (width, height) = rgb.dimensions();
            self.frames_read += 1;
            let frame = Frame::new(index, self.timestamp(index), width, height, rgb.into_raw())?;
            return Ok(Some(frame));
        }
        Ok(None)
    }

    fn fps(&self) -> Option<f64> {
        self.fps
    }

    fn close(&mut self) {
        self.files.clear();
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_read: self.frames_read,
            source: self.dir.display().to_string(),
        }
    }
}

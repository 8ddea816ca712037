use std::path::PathBuf;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::error::{PipelineError, Result};
use crate::frame::Frame;
use crate::labels::{label_file_name, read_label_file};

/// Replays detections from `frame_<index>.txt` label files in a directory.
///
/// Lets a recorded run be re-evaluated with a different grid or threshold
/// without calling a model again. A frame with no label file is a detector
/// failure for that frame.
pub struct LabelFileBackend {
    dir: PathBuf,
}

impl LabelFileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(PipelineError::config(format!(
                "label directory {} does not exist",
                dir.display()
            )));
        }
        Ok(Self { dir })
    }
}

impl DetectorBackend for LabelFileBackend {
    fn name(&self) -> &'static str {
        "labels"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let path = self.dir.join(label_file_name(frame.index));
        read_label_file(&path).map_err(|e| PipelineError::detector(format!("{e:#}")))
    }

    /// Fails when the directory holds no `frame_<index>.txt` files, which
    /// usually means the wrong directory was passed.
    fn warm_up(&mut self) -> Result<()> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            PipelineError::detector(format!("read label directory {}: {e}", self.dir.display()))
        })?;
        let count = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.starts_with("frame_") && name.ends_with(".txt")
            })
            .count();
        if count == 0 {
            return Err(PipelineError::detector(format!(
                "no label files in {}",
                self.dir.display()
            )));
        }
        log::info!("replaying {} label files from {}", count, self.dir.display());
        Ok(())
    }
}

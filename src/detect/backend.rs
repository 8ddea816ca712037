use std::sync::{Arc, Mutex};

use crate::detect::result::Detection;
use crate::error::Result;
use crate::frame::Frame;

/// Detector backends shared between the registry and the sampler's worker threads.
pub type SharedBackend = Arc<Mutex<dyn DetectorBackend>>;

/// Object detector backend.
///
/// An empty detection list is a normal outcome. Failures are reported as
/// `PipelineError::DetectorFailure`; the sampler treats them as "no detections"
/// for that frame and keeps going.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

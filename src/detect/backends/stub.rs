use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::error::Result;
use crate::frame::Frame;

/// Stub backend for demos and tests. Returns the same detections for every frame.
#[derive(Default)]
pub struct StubBackend {
    detections: Vec<Detection>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detections(detections: Vec<Detection>) -> Self {
        Self { detections }
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        Ok(self.detections.clone())
    }
}

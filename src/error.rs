//! Error taxonomy for the sampling pipeline.
//!
//! Only `Config` is fatal, and only at startup. Every other variant is scoped to
//! a single frame or a single submission and is logged by the caller.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid bounding box: {0}")]
    InvalidBox(String),

    #[error("detector failed: {0}")]
    DetectorFailure(String),

    #[error("detector timed out after {0} ms")]
    DetectorTimeout(u64),

    #[error("sink delivery failed: {0}")]
    SinkDelivery(String),

    #[error("video source exhausted")]
    SourceExhausted,

    #[error("video source error: {0}")]
    Source(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_box<S: Into<String>>(msg: S) -> Self {
        Self::InvalidBox(msg.into())
    }

    pub fn detector<S: Into<String>>(msg: S) -> Self {
        Self::DetectorFailure(msg.into())
    }

    pub fn sink<S: Into<String>>(msg: S) -> Self {
        Self::SinkDelivery(msg.into())
    }

    pub fn source<S: Into<String>>(msg: S) -> Self {
        Self::Source(msg.into())
    }
}

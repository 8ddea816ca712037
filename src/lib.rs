//! Soilwatch
//!
//! Samples frames from a video stream, runs an object detector on each
//! sampled frame, and reports how many cells of a fixed grid are "dirty",
//! i.e. covered by detections beyond a threshold.
//!
//! # Architecture
//!
//! 1. **Frame Sampler** (`sampler`): pulls frames at a fixed cadence and drives
//!    detection, classification and publishing. Cooperative stop; per-frame
//!    failures never end the stream.
//! 2. **Object Detector** (`detect`): pluggable backends behind one trait, each
//!    call bounded by a timeout.
//! 3. **Grid Classifier** (`grid`, `geometry`): sums box/cell overlaps and
//!    compares the covered fraction against the overlap threshold.
//! 4. **Result Publisher** (`publish`): best-effort delivery on a worker
//!    thread, decoupled from sampling by a bounded queue.
//! 5. **Ingestion Buffer** (`buffer`, `api`): thread-safe FIFO behind a small
//!    HTTP server, drained wholesale by a dashboard poller.
//!
//! # Module Structure
//!
//! - `frame`, `ingest`: decoded frames and the sources that produce them
//! - `labels`, `observe`: label files and optional per-frame side outputs
//! - `config`, `error`: startup configuration and the error taxonomy

pub mod api;
pub mod buffer;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod grid;
pub mod ingest;
pub mod labels;
pub mod observe;
pub mod publish;
pub mod sampler;

pub use api::{DirtyBoxes, SinkHandle, SinkServer};
pub use buffer::{IngestionBuffer, OverflowPolicy};
pub use config::{PipelineConfig, PublishSettings, SamplingInterval, SinkServerConfig};
pub use detect::{
    BackendRegistry, Detection, DetectorBackend, HttpBackend, LabelFileBackend, SharedBackend,
    StubBackend,
};
pub use error::{PipelineError, Result};
pub use frame::Frame;
pub use geometry::{intersection_area, normalize, BoundingBox, CenterBox, CoordinateSpace, Rect};
pub use grid::{ActiveRegion, CellClassification, FrameResult, GridCell, GridClassifier, GridLayout};
pub use ingest::{
    open_source, FrameSource, ImageDirSource, SourceConfig, SourceStats, SyntheticSource,
};
pub use observe::{AnnotatedFrameWriter, FrameObserver, LabelArchive};
pub use publish::{
    BufferSink, HttpSink, IngestPayload, PublisherStats, ResultPublisher, ResultSink, WireEntry,
};
pub use sampler::{Cadence, FrameSampler, PipelineReport, SamplerStats, StopSignal};

//! Frame sampling loop.
//!
//! `FrameSampler::run` drives one source from connect to end-of-stream:
//! pick frames at the configured cadence, run the detector under a timeout,
//! classify the grid, hand the result to observers and the publisher. Only
//! configuration problems discovered at startup are returned as errors; every
//! per-frame failure is logged and the loop moves on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use crate::config::{PipelineConfig, SamplingInterval};
use crate::detect::{Detection, SharedBackend};
use crate::error::{PipelineError, Result};
use crate::frame::Frame;
use crate::grid::{GridClassifier, GridLayout};
use crate::ingest::{FrameSource, SourceStats};
use crate::observe::FrameObserver;
use crate::publish::{PublisherStats, ResultPublisher};

/// Cooperative stop flag, checked before each frame is pulled.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Sample every `step`-th frame, starting with frame 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cadence {
    step: u64,
}

impl Cadence {
    pub fn every(step: u64) -> Self {
        Self { step: step.max(1) }
    }

    /// Turn a configured interval into a frame step using the source's native
    /// frame rate. A time interval without a frame rate is a configuration error.
    pub fn resolve(interval: SamplingInterval, fps: Option<f64>) -> Result<Self> {
        match interval {
            SamplingInterval::Frames(step) => Ok(Self::every(step)),
            SamplingInterval::Seconds(secs) => match fps {
                Some(fps) if fps.is_finite() && fps > 0.0 => {
                    Ok(Self::every((fps * secs).round() as u64))
                }
                _ => Err(PipelineError::config(format!(
                    "a {secs}s sampling interval needs a source frame rate; set a frame step instead"
                ))),
            },
        }
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn should_sample(&self, frame_index: u64) -> bool {
        frame_index % self.step == 0
    }
}

/// Counters returned by `FrameSampler::run`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub frames_read: u64,
    pub frames_sampled: u64,
    /// Sampled frames skipped because their size does not fit the grid.
    pub frames_skipped: u64,
    pub detector_failures: u64,
    pub detector_timeouts: u64,
    pub boxes_dropped: u64,
    pub observer_failures: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub sampler: SamplerStats,
    /// What the source itself reports at close.
    pub source: SourceStats,
    /// `None` when no publisher was attached.
    pub publisher: Option<PublisherStats>,
}

pub struct FrameSampler {
    sampling: SamplingInterval,
    classifier: GridClassifier,
    detector: SharedBackend,
    detector_timeout: Duration,
    detector_busy: Arc<AtomicBool>,
    publisher: Option<ResultPublisher>,
    observers: Vec<Box<dyn FrameObserver>>,
    stop: StopSignal,
    layout: Option<(u32, u32, GridLayout)>,
}

impl FrameSampler {
    pub fn new(config: &PipelineConfig, detector: SharedBackend) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            sampling: config.sampling,
            classifier: GridClassifier::from_config(config)?,
            detector,
            detector_timeout: config.detector_timeout,
            detector_busy: Arc::new(AtomicBool::new(false)),
            publisher: None,
            observers: Vec::new(),
            stop: StopSignal::new(),
            layout: None,
        })
    }

    pub fn with_publisher(mut self, publisher: ResultPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn FrameObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Sample `source` until it ends or the stop signal is raised.
    ///
    /// The source is closed and the publisher flushed on every path out of
    /// this function, including startup errors.
    pub fn run(mut self, source: &mut dyn FrameSource) -> Result<PipelineReport> {
        let outcome = match source.connect() {
            Ok(()) => self.sample_all(source),
            Err(err) => Err(PipelineError::config(format!(
                "failed to open video source: {err}"
            ))),
        };
        let source_stats = source.stats();
        source.close();
        let publisher = self.publisher.take().map(ResultPublisher::finish);

        let sampler = outcome?;
        log::info!(
            "sampler done: {} frames read, {} sampled, {} detector failures, {} timeouts, {} boxes dropped",
            sampler.frames_read,
            sampler.frames_sampled,
            sampler.detector_failures,
            sampler.detector_timeouts,
            sampler.boxes_dropped
        );
        log::info!(
            "source {} closed after {} frames",
            source_stats.source,
            source_stats.frames_read
        );
        if let Some(stats) = &publisher {
            log::info!(
                "publisher done: {} submitted, {} delivered, {} failed, {} dropped",
                stats.submitted,
                stats.delivered,
                stats.failed,
                stats.dropped
            );
        }
        Ok(PipelineReport {
            sampler,
            source: source_stats,
            publisher,
        })
    }

    fn sample_all(&mut self, source: &mut dyn FrameSource) -> Result<SamplerStats> {
        let cadence = Cadence::resolve(self.sampling, source.fps())?;
        log::debug!(
            "sampling every {} frames (source fps {:?})",
            cadence.step(),
            source.fps()
        );
        if let Some((width, height)) = source.frame_size() {
            self.layout_for(width, height)?;
        }

        let mut stats = SamplerStats::default();
        loop {
            if self.stop.is_stopped() {
                log::info!("stop requested after {} frames", stats.frames_read);
                break;
            }
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::info!("{}", PipelineError::SourceExhausted);
                    break;
                }
                Err(err) => {
                    log::warn!("stopping on source error: {}", err);
                    break;
                }
            };
            stats.frames_read += 1;
            if !cadence.should_sample(frame.index) {
                continue;
            }

            let layout = match self.layout_for(frame.width, frame.height) {
                Ok(layout) => layout,
                // A grid that does not fit the very first frame is a startup error.
                Err(err) if stats.frames_sampled == 0 && stats.frames_skipped == 0 => {
                    return Err(err)
                }
                Err(err) => {
                    stats.frames_skipped += 1;
                    log::warn!("skipping frame {}: {}", frame.index, err);
                    continue;
                }
            };
            self.process(&frame, &layout, &mut stats);
        }
        Ok(stats)
    }

    fn layout_for(&mut self, width: u32, height: u32) -> Result<GridLayout> {
        if let Some((w, h, layout)) = self.layout {
            if (w, h) == (width, height) {
                return Ok(layout);
            }
        }
        let layout = self.classifier.layout(width, height)?;
        self.layout = Some((width, height, layout));
        Ok(layout)
    }

    fn process(&mut self, frame: &Frame, layout: &GridLayout, stats: &mut SamplerStats) {
        stats.frames_sampled += 1;
        let detections = match self.detect_with_timeout(frame) {
            Ok(detections) => detections,
            Err(err) => {
                if matches!(err, PipelineError::DetectorTimeout(_)) {
                    stats.detector_timeouts += 1;
                } else {
                    stats.detector_failures += 1;
                }
                log::warn!("frame {}: {}; treating as no detections", frame.index, err);
                Vec::new()
            }
        };

        let (boxes, dropped) = self
            .classifier
            .prepare_boxes(&detections, frame.width, frame.height);
        stats.boxes_dropped += dropped as u64;
        let result = self.classifier.classify_rects(frame.index, layout, &boxes);
        log::info!(
            "{}: {}/{} dirty segments",
            result.frame_label(),
            result.dirty_count,
            result.evaluated_cells()
        );

        for observer in &mut self.observers {
            if let Err(err) = observer.on_frame(frame, &detections, &result) {
                stats.observer_failures += 1;
                log::warn!("observer {} failed on frame {}: {:#}", observer.name(), frame.index, err);
            }
        }
        if let Some(publisher) = &mut self.publisher {
            publisher.publish(&result);
        }
    }

    /// Run the detector on a worker thread and wait at most `detector_timeout`.
    ///
    /// A call that times out keeps running in the background; until it returns,
    /// later frames fail fast instead of queueing behind it.
    fn detect_with_timeout(&self, frame: &Frame) -> Result<Vec<Detection>> {
        if self.detector_busy.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::detector("previous detector call still running"));
        }
        let (tx, rx) = mpsc::channel();
        let detector = self.detector.clone();
        let release = Release(self.detector_busy.clone());
        let frame = frame.clone();
        let spawned = std::thread::Builder::new()
            .name("soilwatch-detector".to_string())
            .spawn(move || {
                let _release = release;
                let result = detector
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .detect(&frame);
                let _ = tx.send(result);
            });
        // A failed spawn drops the closure, and with it the guard.
        if let Err(err) = spawned {
            return Err(PipelineError::detector(format!("spawn detector thread: {err}")));
        }

        match rx.recv_timeout(self.detector_timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(PipelineError::DetectorTimeout(
                self.detector_timeout.as_millis() as u64,
            )),
            Err(RecvTimeoutError::Disconnected) => Err(PipelineError::detector("detector panicked")),
        }
    }
}

/// Clears the detector-busy flag when the worker finishes, panicking or not.
struct Release(Arc<AtomicBool>);

impl Drop for Release {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

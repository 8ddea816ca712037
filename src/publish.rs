//! Result publishing.
//!
//! The sampler hands each `FrameResult` to a `ResultPublisher`, which queues it
//! on a bounded channel and returns immediately. A worker thread owns the
//! `ResultSink` and performs the (possibly slow) submissions, so a stalled sink
//! can only fill the queue, never the sampling loop. When the queue is full the
//! newest result is dropped and counted.

use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::buffer::IngestionBuffer;
use crate::config::PublishSettings;
use crate::error::{PipelineError, Result};
use crate::grid::FrameResult;

/// Minimal per-frame summary accepted by the ingestion endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEntry {
    pub frame: String,
    pub dirty_segments: u32,
}

impl From<&FrameResult> for WireEntry {
    fn from(result: &FrameResult) -> Self {
        Self {
            frame: result.frame_label(),
            dirty_segments: result.dirty_count,
        }
    }
}

/// Body of `POST /receive_dirty_data`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestPayload {
    pub dirty_segments_data: Vec<WireEntry>,
}

impl IngestPayload {
    pub fn single(entry: WireEntry) -> Self {
        Self {
            dirty_segments_data: vec![entry],
        }
    }
}

/// Destination for published summaries. Resubmitting the same frame is allowed.
pub trait ResultSink: Send {
    fn name(&self) -> &'static str;

    fn submit(&mut self, payload: &IngestPayload) -> Result<()>;
}

/// Posts payloads as JSON to an HTTP ingestion endpoint.
pub struct HttpSink {
    url: String,
    agent: ureq::Agent,
}

impl HttpSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        let parsed = url::Url::parse(&url)
            .map_err(|e| PipelineError::config(format!("invalid sink url '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PipelineError::config(format!(
                "sink url must be http(s), got '{url}'"
            )));
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self { url, agent })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ResultSink for HttpSink {
    fn name(&self) -> &'static str {
        "http"
    }

    fn submit(&mut self, payload: &IngestPayload) -> Result<()> {
        let body = serde_json::to_string(payload)?;
        match self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json")
            .send_string(&body)
        {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, _)) => Err(PipelineError::sink(format!(
                "{} answered HTTP {}",
                self.url, code
            ))),
            Err(err) => Err(PipelineError::sink(format!("{}: {}", self.url, err))),
        }
    }
}

/// Pushes entries straight into an in-process ingestion buffer.
pub struct BufferSink {
    buffer: Arc<IngestionBuffer<WireEntry>>,
}

impl BufferSink {
    pub fn new(buffer: Arc<IngestionBuffer<WireEntry>>) -> Self {
        Self { buffer }
    }
}

impl ResultSink for BufferSink {
    fn name(&self) -> &'static str {
        "buffer"
    }

    fn submit(&mut self, payload: &IngestPayload) -> Result<()> {
        self.buffer.extend(payload.dirty_segments_data.iter().cloned());
        Ok(())
    }
}

/// Counters returned by `ResultPublisher::finish`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublisherStats {
    /// Results accepted onto the queue.
    pub submitted: u64,
    pub delivered: u64,
    /// Results whose every attempt failed.
    pub failed: u64,
    /// Results rejected because the queue was full.
    pub dropped: u64,
}

#[derive(Default)]
struct WorkerStats {
    delivered: u64,
    failed: u64,
}

pub struct ResultPublisher {
    sender: Option<SyncSender<WireEntry>>,
    worker: Option<JoinHandle<WorkerStats>>,
    submitted: u64,
    dropped: u64,
}

impl ResultPublisher {
    pub fn spawn(sink: Box<dyn ResultSink>, settings: &PublishSettings) -> Result<Self> {
        let (sender, receiver) = mpsc::sync_channel(settings.queue_capacity.max(1));
        let max_attempts = settings.max_attempts.max(1);
        let pacing = settings.pacing;
        let worker = std::thread::Builder::new()
            .name("soilwatch-publisher".to_string())
            .spawn(move || run_worker(sink, receiver, max_attempts, pacing))?;
        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            submitted: 0,
            dropped: 0,
        })
    }

    /// Queue a result for delivery. Returns false when it was dropped.
    pub fn publish(&mut self, result: &FrameResult) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        match sender.try_send(WireEntry::from(result)) {
            Ok(()) => {
                self.submitted += 1;
                true
            }
            Err(TrySendError::Full(entry)) => {
                self.dropped += 1;
                log::warn!("publisher queue full; dropping result for {}", entry.frame);
                false
            }
            Err(TrySendError::Disconnected(entry)) => {
                self.dropped += 1;
                log::warn!("publisher worker gone; dropping result for {}", entry.frame);
                false
            }
        }
    }

    /// Close the queue, wait for queued results to be attempted, and report.
    pub fn finish(mut self) -> PublisherStats {
        self.shutdown()
    }

    fn shutdown(&mut self) -> PublisherStats {
        self.sender.take();
        let worker = match self.worker.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                log::error!("publisher worker panicked");
                WorkerStats::default()
            }),
            None => WorkerStats::default(),
        };
        PublisherStats {
            submitted: self.submitted,
            delivered: worker.delivered,
            failed: worker.failed,
            dropped: self.dropped,
        }
    }
}

impl Drop for ResultPublisher {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown();
        }
    }
}

fn run_worker(
    mut sink: Box<dyn ResultSink>,
    receiver: Receiver<WireEntry>,
    max_attempts: u32,
    pacing: Duration,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    for entry in receiver {
        let frame = entry.frame.clone();
        let payload = IngestPayload::single(entry);
        let mut delivered = false;
        for attempt in 1..=max_attempts {
            match sink.submit(&payload) {
                Ok(()) => {
                    delivered = true;
                    break;
                }
                Err(err) => log::warn!(
                    "{} sink: {} attempt {}/{} failed: {}",
                    sink.name(),
                    frame,
                    attempt,
                    max_attempts,
                    err
                ),
            }
        }
        if delivered {
            stats.delivered += 1;
            log::debug!("{} sink: delivered {}", sink.name(), frame);
        } else {
            stats.failed += 1;
        }
        if !pacing.is_zero() {
            std::thread::sleep(pacing);
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn result(frame_index: u64, dirty_count: u32) -> FrameResult {
        FrameResult {
            frame_index,
            dirty_count,
            total_cells: 16,
            cell_classifications: Vec::new(),
        }
    }

    fn settings(max_attempts: u32, queue_capacity: usize) -> PublishSettings {
        PublishSettings {
            max_attempts,
            queue_capacity,
            ..PublishSettings::default()
        }
    }

    struct FailingSink {
        remaining_failures: u32,
        delivered: Arc<Mutex<Vec<String>>>,
    }

    impl ResultSink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn submit(&mut self, payload: &IngestPayload) -> Result<()> {
            if self.remaining_failures > 0 {
                self.remaining_failures -= 1;
                return Err(PipelineError::sink("unreachable"));
            }
            let mut delivered = self.delivered.lock().unwrap();
            delivered.extend(payload.dirty_segments_data.iter().map(|e| e.frame.clone()));
            Ok(())
        }
    }

    struct BlockingSink {
        release: Receiver<()>,
    }

    impl ResultSink for BlockingSink {
        fn name(&self) -> &'static str {
            "blocking"
        }

        fn submit(&mut self, _payload: &IngestPayload) -> Result<()> {
            let _ = self.release.recv();
            Ok(())
        }
    }

    #[test]
    fn wire_shape_matches_ingestion_contract() {
        let payload = IngestPayload::single(WireEntry::from(&result(90, 7)));
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"dirty_segments_data": [{"frame": "frame_90", "dirty_segments": 7}]})
        );
    }

    #[test]
    fn buffer_sink_delivers_in_order() {
        let buffer = Arc::new(IngestionBuffer::unbounded());
        let mut publisher =
            ResultPublisher::spawn(Box::new(BufferSink::new(buffer.clone())), &settings(1, 8))
                .unwrap();
        for i in 0..5 {
            assert!(publisher.publish(&result(i, i as u32)));
        }
        let stats = publisher.finish();
        assert_eq!(stats.delivered, 5);
        let frames: Vec<String> = buffer.drain_all().into_iter().map(|e| e.frame).collect();
        assert_eq!(frames, vec!["frame_0", "frame_1", "frame_2", "frame_3", "frame_4"]);
    }

    #[test]
    fn failed_results_are_dropped_and_later_ones_delivered() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = FailingSink {
            remaining_failures: 3,
            delivered: delivered.clone(),
        };
        let mut publisher = ResultPublisher::spawn(Box::new(sink), &settings(1, 8)).unwrap();
        for i in 0..5 {
            publisher.publish(&result(i, 0));
        }
        let stats = publisher.finish();
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.delivered, 2);
        assert_eq!(*delivered.lock().unwrap(), vec!["frame_3", "frame_4"]);
    }

    #[test]
    fn retries_are_bounded_by_max_attempts() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = FailingSink {
            remaining_failures: 2,
            delivered: delivered.clone(),
        };
        let mut publisher = ResultPublisher::spawn(Box::new(sink), &settings(3, 8)).unwrap();
        publisher.publish(&result(0, 1));
        let stats = publisher.finish();
        assert_eq!((stats.delivered, stats.failed), (1, 0));
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let (release, gate) = mpsc::channel();
        let mut publisher =
            ResultPublisher::spawn(Box::new(BlockingSink { release: gate }), &settings(1, 1))
                .unwrap();
        let mut accepted = 0;
        for i in 0..10 {
            if publisher.publish(&result(i, 0)) {
                accepted += 1;
            }
        }
        // One in flight on the worker plus one queued at most.
        assert!(accepted <= 2);
        drop(release);
        let stats = publisher.finish();
        assert_eq!(stats.submitted, accepted);
        assert_eq!(stats.dropped, 10 - accepted);
    }

    #[test]
    fn http_sink_rejects_bad_urls() {
        assert!(HttpSink::new("not a url", Duration::from_millis(100)).is_err());
        assert!(HttpSink::new("ftp://host/ingest", Duration::from_millis(100)).is_err());
        assert!(HttpSink::new("http://127.0.0.1:5000/receive_dirty_data", Duration::from_millis(100)).is_ok());
    }

    #[test]
    fn http_sink_reports_unreachable_endpoint() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let mut sink = HttpSink::new(
            format!("http://127.0.0.1:{port}/receive_dirty_data"),
            Duration::from_millis(500),
        )
        .unwrap();
        let err = sink
            .submit(&IngestPayload::single(WireEntry::from(&result(0, 0))))
            .unwrap_err();
        assert!(matches!(err, PipelineError::SinkDelivery(_)));
    }
}

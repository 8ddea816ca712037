//! soilwatch - sample a video, classify grid cells, publish dirty-segment counts
//!
//! This binary:
//! 1. Loads the pipeline configuration (file + env + flags)
//! 2. Opens one frame source (video file, image directory or stub://)
//! 3. Runs the selected detector on every sampled frame
//! 4. Publishes per-frame dirty-segment counts to the ingestion endpoint
//! 5. Stops at end of stream or on Ctrl-C

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use soilwatch::{
    open_source, AnnotatedFrameWriter, BackendRegistry, FrameSampler, HttpBackend, HttpSink,
    LabelArchive, LabelFileBackend, PipelineConfig, ResultPublisher, SourceConfig, StopSignal,
    StubBackend,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Grid-based dirty-segment monitoring for video streams"
)]
struct Args {
    /// Video file, directory of still frames, or stub://WxH?frames=N&fps=F.
    #[arg(env = "SOILWATCH_SOURCE")]
    source: String,

    /// Nominal frame rate for sources without timing (image directories).
    #[arg(long, env = "SOILWATCH_SOURCE_FPS")]
    fps: Option<f64>,

    /// Configuration file (.toml, otherwise JSON).
    #[arg(long, env = "SOILWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Detector backend: stub, labels or http.
    #[arg(long, default_value = "stub")]
    detector: String,

    /// Directory of frame_<n>.txt label files to replay as detections.
    #[arg(long, env = "SOILWATCH_LABEL_DIR")]
    label_dir: Option<PathBuf>,

    /// Hosted inference endpoint for the http detector.
    #[arg(long, env = "SOILWATCH_DETECTOR_URL")]
    detector_url: Option<String>,

    /// Ingestion endpoint; overrides the configuration file.
    #[arg(long)]
    sink_url: Option<String>,

    /// Classify and log only; publish nothing.
    #[arg(long)]
    no_publish: bool,

    /// Write frame_<n>.png with the grid outlined.
    #[arg(long, value_name = "DIR")]
    annotate_dir: Option<PathBuf>,

    /// Write each sampled frame's detections as a label file.
    #[arg(long, value_name = "DIR")]
    archive_labels: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = PipelineConfig::load_from(args.config.as_deref())?;
    if let Some(url) = &args.sink_url {
        config.publish.sink_url = Some(url.clone());
        config.validate()?;
    }
    if args.no_publish {
        config.publish.sink_url = None;
    }

    let mut registry = BackendRegistry::new();
    registry.register(StubBackend::new());
    if let Some(dir) = &args.label_dir {
        registry.register(LabelFileBackend::new(dir)?);
    }
    if let Some(url) = &args.detector_url {
        registry.register(HttpBackend::new(url.as_str(), config.detector_timeout)?);
    }
    registry.set_default(&args.detector)?;
    registry.warm_up_all();
    let detector = registry
        .default_backend()
        .context("no detector backend registered")?;
    log::info!("detector backend: {}", args.detector);

    let stop = StopSignal::new();
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || stop_handler.stop()).expect("error setting Ctrl-C handler");

    let mut sampler = FrameSampler::new(&config, detector)?.with_stop_signal(stop);
    if let Some(url) = &config.publish.sink_url {
        let sink = HttpSink::new(url.as_str(), config.publish.timeout)?;
        log::info!("publishing to {}", sink.url());
        sampler = sampler.with_publisher(ResultPublisher::spawn(Box::new(sink), &config.publish)?);
    } else {
        log::info!("publishing disabled");
    }
    if let Some(dir) = &args.annotate_dir {
        sampler = sampler.with_observer(Box::new(AnnotatedFrameWriter::new(dir)?));
    }
    if let Some(dir) = &args.archive_labels {
        sampler = sampler.with_observer(Box::new(LabelArchive::new(dir)?));
    }

    let mut source = open_source(&SourceConfig {
        path: args.source.clone(),
        fps: args.fps,
    })?;
    let report = sampler.run(source.as_mut())?;
    log::info!(
        "{}: {} frames read, {} sampled",
        args.source,
        report.sampler.frames_read,
        report.sampler.frames_sampled
    );
    Ok(())
}

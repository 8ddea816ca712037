use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::grid::ActiveRegion;

const DEFAULT_GRID_ROWS: u32 = 24;
const DEFAULT_GRID_COLS: u32 = 12;
const DEFAULT_OVERLAP_THRESHOLD: f64 = 0.4;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.4;
const DEFAULT_INTERVAL_SECS: f64 = 30.0;
const DEFAULT_DETECTOR_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_SINK_URL: &str = "http://127.0.0.1:5000/receive_dirty_data";
const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_PUBLISH_ATTEMPTS: u32 = 1;
const DEFAULT_PUBLISH_QUEUE: usize = 64;
const DEFAULT_SINK_ADDR: &str = "127.0.0.1:5000";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    grid_rows: Option<u32>,
    grid_cols: Option<u32>,
    overlap_threshold: Option<f64>,
    detector_confidence_threshold: Option<f32>,
    detector_timeout_ms: Option<u64>,
    sampling: Option<SamplingConfigFile>,
    active_regions: Option<Vec<ActiveRegion>>,
    publish: Option<PublishConfigFile>,
    sink_server: Option<SinkServerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SamplingConfigFile {
    interval_secs: Option<f64>,
    frame_step: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PublishConfigFile {
    sink_url: Option<String>,
    timeout_ms: Option<u64>,
    max_attempts: Option<u32>,
    queue_capacity: Option<usize>,
    pacing_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SinkServerConfigFile {
    addr: Option<String>,
    buffer_capacity: Option<usize>,
}

/// How often a frame is taken from the stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SamplingInterval {
    /// Wall-clock spacing in stream time; needs a source with timing.
    Seconds(f64),
    /// Every N-th decoded frame.
    Frames(u64),
}

#[derive(Clone, Debug)]
pub struct PublishSettings {
    /// Ingestion endpoint. `None` disables HTTP publishing.
    pub sink_url: Option<String>,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub queue_capacity: usize,
    /// Delay after each submission, applied on the publisher thread.
    pub pacing: Duration,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            sink_url: Some(DEFAULT_SINK_URL.to_string()),
            timeout: Duration::from_millis(DEFAULT_PUBLISH_TIMEOUT_MS),
            max_attempts: DEFAULT_PUBLISH_ATTEMPTS,
            queue_capacity: DEFAULT_PUBLISH_QUEUE,
            pacing: Duration::ZERO,
        }
    }
}

/// Pipeline settings. Loaded once at startup and never mutated afterwards.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub sampling: SamplingInterval,
    pub grid_rows: u32,
    pub grid_cols: u32,
    pub overlap_threshold: f64,
    pub detector_confidence_threshold: f32,
    /// Cells to evaluate; empty means the whole grid.
    pub active_regions: Vec<ActiveRegion>,
    pub detector_timeout: Duration,
    pub publish: PublishSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sampling: SamplingInterval::Seconds(DEFAULT_INTERVAL_SECS),
            grid_rows: DEFAULT_GRID_ROWS,
            grid_cols: DEFAULT_GRID_COLS,
            overlap_threshold: DEFAULT_OVERLAP_THRESHOLD,
            detector_confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            active_regions: Vec::new(),
            detector_timeout: Duration::from_millis(DEFAULT_DETECTOR_TIMEOUT_MS),
            publish: PublishSettings::default(),
        }
    }
}

/// Settings for the embedded ingestion server.
#[derive(Clone, Debug)]
pub struct SinkServerConfig {
    pub addr: String,
    /// `None` keeps every unread result; `Some(n)` drops the oldest beyond `n`.
    pub buffer_capacity: Option<usize>,
}

impl Default for SinkServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_SINK_ADDR.to_string(),
            buffer_capacity: None,
        }
    }
}

impl PipelineConfig {
    /// Load from the file named by `SOILWATCH_CONFIG` (if any), apply env
    /// overrides, and validate.
    pub fn load() -> Result<Self> {
        let path = std::env::var("SOILWATCH_CONFIG").ok();
        Self::load_from(path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => ConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let sampling = match file.sampling {
            Some(SamplingConfigFile {
                interval_secs: Some(_),
                frame_step: Some(_),
            }) => {
                return Err(PipelineError::config(
                    "sampling: set either interval_secs or frame_step, not both",
                ))
            }
            Some(SamplingConfigFile {
                interval_secs: Some(secs),
                ..
            }) => SamplingInterval::Seconds(secs),
            Some(SamplingConfigFile {
                frame_step: Some(step),
                ..
            }) => SamplingInterval::Frames(step),
            _ => defaults.sampling,
        };
        let publish_file = file.publish.unwrap_or_default();
        let publish = PublishSettings {
            sink_url: match publish_file.sink_url {
                Some(url) if url.trim().is_empty() => None,
                Some(url) => Some(url),
                None => defaults.publish.sink_url,
            },
            timeout: publish_file
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.publish.timeout),
            max_attempts: publish_file
                .max_attempts
                .unwrap_or(defaults.publish.max_attempts),
            queue_capacity: publish_file
                .queue_capacity
                .unwrap_or(defaults.publish.queue_capacity),
            pacing: publish_file
                .pacing_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.publish.pacing),
        };
        Ok(Self {
            sampling,
            grid_rows: file.grid_rows.unwrap_or(defaults.grid_rows),
            grid_cols: file.grid_cols.unwrap_or(defaults.grid_cols),
            overlap_threshold: file.overlap_threshold.unwrap_or(defaults.overlap_threshold),
            detector_confidence_threshold: file
                .detector_confidence_threshold
                .unwrap_or(defaults.detector_confidence_threshold),
            active_regions: file.active_regions.unwrap_or_default(),
            detector_timeout: file
                .detector_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.detector_timeout),
            publish,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(grid) = env_value("SOILWATCH_GRID") {
            let (rows, cols) = parse_grid(&grid)?;
            self.grid_rows = rows;
            self.grid_cols = cols;
        }
        if let Some(value) = env_value("SOILWATCH_OVERLAP_THRESHOLD") {
            self.overlap_threshold = parse_env("SOILWATCH_OVERLAP_THRESHOLD", &value)?;
        }
        if let Some(value) = env_value("SOILWATCH_CONFIDENCE_THRESHOLD") {
            self.detector_confidence_threshold =
                parse_env("SOILWATCH_CONFIDENCE_THRESHOLD", &value)?;
        }
        if let Some(value) = env_value("SOILWATCH_INTERVAL_SECS") {
            self.sampling = SamplingInterval::Seconds(parse_env("SOILWATCH_INTERVAL_SECS", &value)?);
        }
        if let Some(value) = env_value("SOILWATCH_FRAME_STEP") {
            self.sampling = SamplingInterval::Frames(parse_env("SOILWATCH_FRAME_STEP", &value)?);
        }
        if let Some(url) = env_value("SOILWATCH_SINK_URL") {
            self.publish.sink_url = Some(url);
        }
        Ok(())
    }

    /// Reject settings that cannot produce a meaningful grid or cadence.
    pub fn validate(&self) -> Result<()> {
        if self.grid_rows == 0 || self.grid_cols == 0 {
            return Err(PipelineError::config(format!(
                "grid must be at least 1x1, got {}x{}",
                self.grid_rows, self.grid_cols
            )));
        }
        match self.sampling {
            SamplingInterval::Seconds(secs) if !(secs.is_finite() && secs > 0.0) => {
                return Err(PipelineError::config(format!(
                    "sampling interval must be positive, got {secs}"
                )))
            }
            SamplingInterval::Frames(0) => {
                return Err(PipelineError::config("frame step must be at least 1"))
            }
            _ => {}
        }
        if !(self.overlap_threshold > 0.0 && self.overlap_threshold <= 1.0) {
            return Err(PipelineError::config(format!(
                "overlap threshold must be in (0, 1], got {}",
                self.overlap_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.detector_confidence_threshold) {
            return Err(PipelineError::config(format!(
                "detector confidence threshold must be in [0, 1], got {}",
                self.detector_confidence_threshold
            )));
        }
        if self.detector_timeout.is_zero() {
            return Err(PipelineError::config("detector timeout must be greater than zero"));
        }
        if self.publish.timeout.is_zero() {
            return Err(PipelineError::config("publish timeout must be greater than zero"));
        }
        if self.publish.max_attempts == 0 {
            return Err(PipelineError::config("publish max_attempts must be at least 1"));
        }
        if self.publish.queue_capacity == 0 {
            return Err(PipelineError::config("publish queue_capacity must be at least 1"));
        }
        if let Some(url) = &self.publish.sink_url {
            let parsed = url::Url::parse(url)
                .map_err(|e| PipelineError::config(format!("invalid sink url '{url}': {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(PipelineError::config(format!(
                    "sink url must be http(s), got '{url}'"
                )));
            }
        }
        // Region bounds are checked against the grid by the classifier.
        crate::grid::GridClassifier::from_config(self).map(|_| ())
    }
}

impl SinkServerConfig {
    pub fn load() -> Result<Self> {
        let path = std::env::var("SOILWATCH_CONFIG").ok();
        Self::load_from(path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => read_config_file(path)?.sink_server.unwrap_or_default(),
            None => SinkServerConfigFile::default(),
        };
        let defaults = Self::default();
        let mut cfg = Self {
            addr: file.addr.unwrap_or(defaults.addr),
            buffer_capacity: file.buffer_capacity,
        };
        if let Some(addr) = env_value("SOILWATCH_SINK_ADDR") {
            cfg.addr = addr;
        }
        if let Some(value) = env_value("SOILWATCH_SINK_CAPACITY") {
            cfg.buffer_capacity = Some(parse_env("SOILWATCH_SINK_CAPACITY", &value)?);
        }
        if cfg.buffer_capacity == Some(0) {
            return Err(PipelineError::config("sink buffer capacity must be at least 1"));
        }
        Ok(cfg)
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::config(format!("failed to read config file {}: {}", path.display(), e))
    })?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        toml::from_str(&raw).map_err(|e| {
            PipelineError::config(format!("invalid config file {}: {}", path.display(), e))
        })
    } else {
        serde_json::from_str(&raw).map_err(|e| {
            PipelineError::config(format!("invalid config file {}: {}", path.display(), e))
        })
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| PipelineError::config(format!("{key} has an invalid value '{value}'")))
}

/// Parse `ROWSxCOLS`, e.g. `24x12`.
pub fn parse_grid(value: &str) -> Result<(u32, u32)> {
    let (rows, cols) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| PipelineError::config(format!("grid must be ROWSxCOLS, got '{value}'")))?;
    let rows = parse_env("grid rows", rows.trim())?;
    let cols = parse_env("grid cols", cols.trim())?;
    Ok((rows, cols))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = PipelineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.sampling, SamplingInterval::Seconds(30.0));
        assert_eq!((cfg.grid_rows, cfg.grid_cols), (24, 12));
    }

    #[test]
    fn parses_grid_strings() {
        assert_eq!(parse_grid("4x4").unwrap(), (4, 4));
        assert_eq!(parse_grid(" 12X8 ").unwrap(), (12, 8));
        assert!(parse_grid("12").is_err());
        assert!(parse_grid("ax3").is_err());
    }

    fn rejected(mutate: impl FnOnce(&mut PipelineConfig)) -> bool {
        let mut cfg = PipelineConfig::default();
        mutate(&mut cfg);
        matches!(cfg.validate(), Err(PipelineError::Config(_)))
    }

    #[test]
    fn rejects_invalid_settings() {
        assert!(rejected(|c| c.grid_rows = 0));
        assert!(rejected(|c| c.grid_cols = 0));
        assert!(rejected(|c| c.sampling = SamplingInterval::Seconds(0.0)));
        assert!(rejected(|c| c.sampling = SamplingInterval::Seconds(f64::NAN)));
        assert!(rejected(|c| c.sampling = SamplingInterval::Frames(0)));
        assert!(rejected(|c| c.overlap_threshold = 0.0));
        assert!(rejected(|c| c.overlap_threshold = 1.01));
        assert!(rejected(|c| c.detector_confidence_threshold = 1.5));
        assert!(rejected(|c| c.detector_timeout = Duration::ZERO));
        assert!(rejected(|c| c.publish.max_attempts = 0));
        assert!(rejected(|c| c.publish.sink_url = Some("ftp://host/x".to_string())));
        assert!(rejected(|c| c.active_regions = vec![ActiveRegion::new(20..30, 0..1)]));
    }

    #[test]
    fn threshold_of_one_is_allowed() {
        let cfg = PipelineConfig {
            overlap_threshold: 1.0,
            ..PipelineConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_conflicting_sampling() {
        let file = ConfigFile {
            sampling: Some(SamplingConfigFile {
                interval_secs: Some(1.0),
                frame_step: Some(3),
            }),
            ..ConfigFile::default()
        };
        assert!(PipelineConfig::from_file(file).is_err());
    }

    #[test]
    fn empty_sink_url_disables_publishing() {
        let file = ConfigFile {
            publish: Some(PublishConfigFile {
                sink_url: Some(String::new()),
                ..PublishConfigFile::default()
            }),
            ..ConfigFile::default()
        };
        let cfg = PipelineConfig::from_file(file).unwrap();
        assert!(cfg.publish.sink_url.is_none());
    }
}

use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use soilwatch::config::{PipelineConfig, SamplingInterval, SinkServerConfig};
use soilwatch::{ActiveRegion, PipelineError};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SOILWATCH_CONFIG",
        "SOILWATCH_GRID",
        "SOILWATCH_OVERLAP_THRESHOLD",
        "SOILWATCH_CONFIDENCE_THRESHOLD",
        "SOILWATCH_INTERVAL_SECS",
        "SOILWATCH_FRAME_STEP",
        "SOILWATCH_SINK_URL",
        "SOILWATCH_SINK_ADDR",
        "SOILWATCH_SINK_CAPACITY",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(&mut file, contents.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = PipelineConfig::load().expect("load config");

    assert_eq!((cfg.grid_rows, cfg.grid_cols), (24, 12));
    assert_eq!(cfg.sampling, SamplingInterval::Seconds(30.0));
    assert_eq!(cfg.overlap_threshold, 0.4);
    assert_eq!(cfg.detector_confidence_threshold, 0.4);
    assert!(cfg.active_regions.is_empty());
    assert_eq!(
        cfg.publish.sink_url.as_deref(),
        Some("http://127.0.0.1:5000/receive_dirty_data")
    );
    assert_eq!(cfg.publish.max_attempts, 1);
}

#[test]
fn loads_toml_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".toml",
        r#"
            grid_rows = 24
            grid_cols = 12
            overlap_threshold = 0.5
            detector_timeout_ms = 750

            [sampling]
            frame_step = 90

            [[active_regions]]
            rows = [5, 7]
            cols = [2, 3]

            [[active_regions]]
            rows = [4, 7]
            cols = [3, 10]

            [publish]
            sink_url = "http://10.0.0.5:5000/receive_dirty_data"
            timeout_ms = 1500
            max_attempts = 2
            queue_capacity = 16
            pacing_ms = 250
        "#,
    );
    std::env::set_var("SOILWATCH_CONFIG", file.path());
    std::env::set_var("SOILWATCH_GRID", "12x6");
    std::env::set_var("SOILWATCH_CONFIDENCE_THRESHOLD", "0.6");

    let cfg = PipelineConfig::load().expect("load config");

    assert_eq!((cfg.grid_rows, cfg.grid_cols), (12, 6));
    assert_eq!(cfg.overlap_threshold, 0.5);
    assert_eq!(cfg.detector_confidence_threshold, 0.6);
    assert_eq!(cfg.sampling, SamplingInterval::Frames(90));
    assert_eq!(cfg.detector_timeout, Duration::from_millis(750));
    assert_eq!(
        cfg.active_regions,
        vec![ActiveRegion::new(5..7, 2..3), ActiveRegion::new(4..7, 3..10)]
    );
    assert_eq!(
        cfg.publish.sink_url.as_deref(),
        Some("http://10.0.0.5:5000/receive_dirty_data")
    );
    assert_eq!(cfg.publish.timeout, Duration::from_millis(1500));
    assert_eq!(cfg.publish.max_attempts, 2);
    assert_eq!(cfg.publish.queue_capacity, 16);
    assert_eq!(cfg.publish.pacing, Duration::from_millis(250));

    clear_env();
}

#[test]
fn loads_json_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".json",
        r#"{
            "grid_rows": 4,
            "grid_cols": 4,
            "sampling": { "interval_secs": 2.5 },
            "sink_server": { "addr": "0.0.0.0:5001", "buffer_capacity": 500 }
        }"#,
    );
    std::env::set_var("SOILWATCH_CONFIG", file.path());
    std::env::set_var("SOILWATCH_INTERVAL_SECS", "5");

    let cfg = PipelineConfig::load().expect("load config");
    assert_eq!((cfg.grid_rows, cfg.grid_cols), (4, 4));
    assert_eq!(cfg.sampling, SamplingInterval::Seconds(5.0));

    let server = SinkServerConfig::load().expect("load sink config");
    assert_eq!(server.addr, "0.0.0.0:5001");
    assert_eq!(server.buffer_capacity, Some(500));

    std::env::set_var("SOILWATCH_SINK_CAPACITY", "10");
    let server = SinkServerConfig::load().expect("load sink config");
    assert_eq!(server.buffer_capacity, Some(10));

    clear_env();
}

#[test]
fn invalid_settings_fail_with_config_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for (key, value) in [
        ("SOILWATCH_GRID", "0x12"),
        ("SOILWATCH_GRID", "24"),
        ("SOILWATCH_OVERLAP_THRESHOLD", "1.5"),
        ("SOILWATCH_OVERLAP_THRESHOLD", "0"),
        ("SOILWATCH_INTERVAL_SECS", "-3"),
        ("SOILWATCH_FRAME_STEP", "0"),
        ("SOILWATCH_SINK_URL", "ftp://collector"),
    ] {
        std::env::set_var(key, value);
        let err = PipelineConfig::load().expect_err(key);
        assert!(matches!(err, PipelineError::Config(_)), "{key}={value}: {err}");
        std::env::remove_var(key);
    }

    clear_env();
}

#[test]
fn region_outside_grid_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".toml",
        r#"
            grid_rows = 4
            grid_cols = 4

            [[active_regions]]
            rows = [2, 6]
            cols = [0, 1]
        "#,
    );
    std::env::set_var("SOILWATCH_CONFIG", file.path());

    assert!(matches!(PipelineConfig::load(), Err(PipelineError::Config(_))));

    clear_env();
}

#[test]
fn unreadable_or_malformed_file_is_a_config_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SOILWATCH_CONFIG", "/no/such/soilwatch.toml");
    assert!(matches!(PipelineConfig::load(), Err(PipelineError::Config(_))));

    let file = write_config(".toml", "grid_rows = \"many\"\n");
    std::env::set_var("SOILWATCH_CONFIG", file.path());
    assert!(matches!(PipelineConfig::load(), Err(PipelineError::Config(_))));

    let file = write_config(".json", r#"{"grid_rowz": 4}"#);
    std::env::set_var("SOILWATCH_CONFIG", file.path());
    assert!(matches!(PipelineConfig::load(), Err(PipelineError::Config(_))));

    clear_env();
}

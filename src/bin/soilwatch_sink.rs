//! soilwatch_sink - ingestion server for dirty-segment results
//!
//! This daemon:
//! 1. Accepts published results on POST /receive_dirty_data
//! 2. Buffers them in memory (unbounded, or drop-oldest when capped)
//! 3. Hands the whole buffer to the dashboard on GET /dirty_boxes

use anyhow::Result;
use std::sync::mpsc;

use soilwatch::{SinkServer, SinkServerConfig};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = SinkServerConfig::load()?;
    match config.buffer_capacity {
        Some(cap) => log::info!("sink buffer capped at {} entries (drop oldest)", cap),
        None => log::info!("sink buffer unbounded"),
    }
    let handle = SinkServer::new(config).spawn()?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("soilwatch_sink waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping sink server...");
    handle.stop()?;

    Ok(())
}

//! Embedded ingestion server.
//!
//! Publishers POST summaries to `/receive_dirty_data`; a dashboard polls
//! `GET /dirty_boxes`, which returns and empties the buffer in one step.
//! Each accepted connection is served on its own short-lived thread, so a slow
//! or idle client cannot hold up publishers.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::buffer::{IngestionBuffer, OverflowPolicy};
use crate::config::SinkServerConfig;
use crate::publish::{IngestPayload, WireEntry};

const MAX_HEADER_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Response body of `GET /dirty_boxes`: parallel arrays for charting.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirtyBoxes {
    pub labels: Vec<String>,
    pub values: Vec<u32>,
}

impl From<Vec<WireEntry>> for DirtyBoxes {
    fn from(entries: Vec<WireEntry>) -> Self {
        let (labels, values) = entries
            .into_iter()
            .map(|entry| (entry.frame, entry.dirty_segments))
            .unzip();
        Self { labels, values }
    }
}

#[derive(Debug)]
pub struct SinkHandle {
    pub addr: SocketAddr,
    buffer: Arc<IngestionBuffer<WireEntry>>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl SinkHandle {
    pub fn buffer(&self) -> Arc<IngestionBuffer<WireEntry>> {
        self.buffer.clone()
    }

    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("sink server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct SinkServer {
    cfg: SinkServerConfig,
    buffer: Arc<IngestionBuffer<WireEntry>>,
}

impl SinkServer {
    pub fn new(cfg: SinkServerConfig) -> Self {
        let buffer = Arc::new(IngestionBuffer::new(OverflowPolicy::from_capacity(
            cfg.buffer_capacity,
        )));
        Self { cfg, buffer }
    }

    pub fn spawn(self) -> Result<SinkHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid sink address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("failed to bind {configured_addr}"))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let buffer = self.buffer.clone();
        let join = std::thread::Builder::new()
            .name("soilwatch-sink".to_string())
            .spawn(move || {
                if let Err(err) = run_server(listener, buffer, &shutdown_thread) {
                    log::error!("sink server stopped: {}", err);
                }
            })?;

        log::info!("sink server listening on http://{}", addr);
        Ok(SinkHandle {
            addr,
            buffer: self.buffer,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_server(
    listener: TcpListener,
    buffer: Arc<IngestionBuffer<WireEntry>>,
    shutdown: &AtomicBool,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let buffer = buffer.clone();
                let spawned = std::thread::Builder::new()
                    .name("soilwatch-sink-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &buffer) {
                            log::warn!("sink request from {} rejected: {}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("dropping connection from {}: {}", peer, err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, buffer: &IngestionBuffer<WireEntry>) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            write_json_response(&mut stream, 400, r#"{"error":"bad_request"}"#)?;
            return Err(err);
        }
    };

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => {
            let body = serde_json::json!({"status": "ok", "buffered": buffer.len()});
            write_json_response(&mut stream, 200, &body.to_string())
        }
        ("POST", "/receive_dirty_data") => {
            let payload: IngestPayload = match serde_json::from_slice(&request.body) {
                Ok(payload) => payload,
                Err(err) => {
                    write_json_response(&mut stream, 400, r#"{"error":"invalid_payload"}"#)?;
                    return Err(anyhow!("invalid ingestion payload: {}", err));
                }
            };
            let accepted = payload.dirty_segments_data.len();
            let evicted = buffer.extend(payload.dirty_segments_data);
            if evicted > 0 {
                log::warn!("sink buffer full; evicted {} oldest entries", evicted);
            }
            log::debug!("sink accepted {} entries", accepted);
            let body = serde_json::json!({"status": "ok", "accepted": accepted});
            write_json_response(&mut stream, 200, &body.to_string())
        }
        ("GET", "/dirty_boxes") => {
            let view = DirtyBoxes::from(buffer.drain_all());
            let payload = serde_json::to_vec(&view)?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        ("POST", "/reset") => {
            let cleared = buffer.clear();
            log::info!("sink buffer reset; {} entries discarded", cleared);
            let body = serde_json::json!({"status": "ok", "cleared": cleared});
            write_json_response(&mut stream, 200, &body.to_string())
        }
        (_, "/health" | "/receive_dirty_data" | "/dirty_boxes" | "/reset") => {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length '{}'", value))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(anyhow!("request body too large"));
    }
    let mut body = data[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of body"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        body,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

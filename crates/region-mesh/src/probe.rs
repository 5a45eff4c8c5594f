//! Single-peer latency tracker
//!
//! Probes one peer's `/latency.json` on a fixed interval and keeps a simple
//! moving average of the measured round trip. The round trip is the interval
//! between finishing the request write and the first response byte arriving,
//! which on a kept-open connection approximates server processing plus one
//! one-way propagation. That definition is load-bearing: peers compare these
//! numbers across regions, so every instance must measure the same way.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::{MeshError, Result, LATENCY_PATH};

/// Errors queued for a consumer before the stream starts dropping them.
const ERR_BACKLOG: usize = 1;

struct TrackerState {
    samples: Vec<Duration>,
    write_pos: usize,
    sma: Duration,
    peer_row: HashMap<String, i64>,
}

pub struct LatencyTracker {
    host: String,
    authority: String,
    sma_window: usize,
    interval: Duration,
    state: RwLock<TrackerState>,
    stop: watch::Sender<bool>,
}

impl LatencyTracker {
    /// `host` is the peer authority, with or without a port (defaults to 80).
    pub fn new(host: impl Into<String>, sma_window: usize, interval: Duration) -> Self {
        let host = host.into();
        let authority = if host.contains(':') {
            host.clone()
        } else {
            format!("{host}:80")
        };

        Self {
            host,
            authority,
            sma_window,
            interval,
            state: RwLock::new(TrackerState {
                samples: vec![Duration::ZERO; sma_window],
                write_pos: 0,
                sma: Duration::ZERO,
                peer_row: HashMap::new(),
            }),
            stop: watch::channel(false).0,
        }
    }

    /// Current moving average in whole milliseconds. `i64::MAX` until the
    /// first successful probe.
    pub fn latency_ms(&self) -> i64 {
        let state = self.state.read();

        if state.write_pos == 0 {
            return i64::MAX;
        }

        state.sma.as_millis() as i64
    }

    /// The peer's own view of every other region, from its last response.
    pub fn latencies(&self) -> HashMap<String, i64> {
        self.state.read().peer_row.clone()
    }

    /// Number of samples currently contributing to the moving average.
    pub fn sample_count(&self) -> usize {
        self.state.read().write_pos.min(self.sma_window)
    }

    /// Starts probing. Probe failures surface on the returned stream; when
    /// nobody is reading they are dropped rather than stalling the probe
    /// loop. The stream closes once, when [`stop`](Self::stop) is called.
    pub fn run(self: Arc<Self>) -> mpsc::Receiver<MeshError> {
        let (tx, rx) = mpsc::channel(ERR_BACKLOG);
        let mut stop = self.stop.subscribe();
        let tracker = self;

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(tracker.interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await;

            loop {
                if *stop.borrow() {
                    return;
                }

                tokio::select! {
                    _ = stop.changed() => return,
                    probed = tokio::time::timeout(tracker.interval, tracker.probe_once()) => {
                        match probed {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => { let _ = tx.try_send(err); }
                            Err(_) => { let _ = tx.try_send(MeshError::Timeout(tracker.interval)); }
                        }
                    }
                }

                tokio::select! {
                    _ = stop.changed() => return,
                    _ = tick.tick() => {}
                }
            }
        });

        rx
    }

    /// Stops the probe loop. Safe to call more than once.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// One measurement round trip. The request is written in full before
    /// `wrote` is taken; `first` is taken at the first response byte. A
    /// connection that closes without producing a byte has no sample.
    async fn probe_once(&self) -> Result<()> {
        let mut conn = TcpStream::connect(&self.authority).await?;

        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nAccept: application/json\r\nConnection: close\r\n\r\n",
            LATENCY_PATH, self.host,
        );
        conn.write_all(request.as_bytes()).await?;
        conn.flush().await?;
        let wrote = Instant::now();

        let mut first: Option<Instant> = None;
        let mut response = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = conn.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            if first.is_none() {
                first = Some(Instant::now());
            }
            response.extend_from_slice(&chunk[..n]);
        }

        let first = first.ok_or(MeshError::ZeroEnd)?;

        let peer_row = decode_response(&response)?;
        self.update(first.duration_since(wrote), peer_row);

        Ok(())
    }

    fn update(&self, sample: Duration, peer_row: HashMap<String, i64>) {
        let mut state = self.state.write();

        state.peer_row = peer_row;

        let slot = state.write_pos % self.sma_window;
        state.samples[slot] = sample;
        state.write_pos += 1;

        let n = state.write_pos.min(self.sma_window);
        let sum: Duration = state.samples[..n].iter().sum();
        state.sma = sum / n as u32;

        debug!(host = %self.host, sma = ?state.sma, samples = n, "probe sample");
    }
}

/// Splits an HTTP/1.1 response at the header terminator, checks for a 200,
/// and decodes the body as a region-to-milliseconds map.
fn decode_response(raw: &[u8]) -> Result<HashMap<String, i64>> {
    let header_end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| MeshError::BadResponse("truncated response head".to_string()))?;

    let status_line = raw[..header_end]
        .split(|&b| b == b'\r')
        .next()
        .unwrap_or_default();
    let status_line = String::from_utf8_lossy(status_line);
    if !status_line.contains(" 200 ") && !status_line.ends_with(" 200") {
        return Err(MeshError::BadResponse(status_line.into_owned()));
    }

    Ok(serde_json::from_slice(&raw[header_end + 4..])?)
}

//! Latency publisher
//!
//! Serves the measurement mesh's view to peers and the curious:
//!
//! - `/latency.json`   this region's row (region -> ms)
//! - `/latencies.json` the full matrix
//! - `/stats.json`     per-path hit counters
//!
//! Snapshots are re-marshaled once a second off the request path; handlers
//! only take a read lock and copy out bytes, so serving never blocks on the
//! trackers or on marshaling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use parking_lot::RwLock;
use region_mesh::{RegionTracker, LATENCIES_PATH, LATENCY_PATH, STATS_PATH};
use tokio::sync::watch;
use tracing::warn;

use crate::AppState;

pub struct Publisher {
    tracker: Arc<RegionTracker>,
    region: String,
    data: RwLock<HashMap<&'static str, Vec<u8>>>,
    counts: HashMap<&'static str, AtomicU64>,
    stop: watch::Sender<bool>,
}

impl Publisher {
    pub fn new(tracker: Arc<RegionTracker>, region: impl Into<String>) -> Self {
        Self {
            tracker,
            region: region.into(),
            data: RwLock::new(HashMap::new()),
            counts: HashMap::from([
                (LATENCY_PATH, AtomicU64::new(0)),
                (LATENCIES_PATH, AtomicU64::new(0)),
                (STATS_PATH, AtomicU64::new(0)),
            ]),
            stop: watch::channel(false).0,
        }
    }

    pub fn run(self: Arc<Self>) {
        let mut stop = self.stop.subscribe();
        let publisher = self;

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                publisher.refresh();

                tokio::select! {
                    _ = stop.changed() => return,
                    _ = tick.tick() => {}
                }
            }
        });
    }

    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Re-marshals all three snapshots from current tracker state. The write
    /// lock is taken per swapped entry, never across marshaling.
    fn refresh(&self) {
        let latencies = self.tracker.latencies();

        match serde_json::to_vec_pretty(&latencies) {
            Ok(json) => {
                self.data.write().insert(LATENCIES_PATH, json);
            }
            Err(err) => warn!(%err, "marshaling latency matrix"),
        }

        let self_row = latencies.get(&self.region).cloned().unwrap_or_default();
        match serde_json::to_vec_pretty(&self_row) {
            Ok(json) => {
                self.data.write().insert(LATENCY_PATH, json);
            }
            Err(err) => warn!(%err, "marshaling self row"),
        }

        let stats: HashMap<&str, u64> = self
            .counts
            .iter()
            .map(|(path, count)| (*path, count.load(Ordering::Relaxed)))
            .collect();
        match serde_json::to_vec_pretty(&stats) {
            Ok(json) => {
                self.data.write().insert(STATS_PATH, json);
            }
            Err(err) => warn!(%err, "marshaling stats"),
        }
    }

    /// Serves the latest snapshot for `path`, counting the hit. 404 until
    /// the first refresh has run.
    fn serve(&self, path: &'static str) -> Response {
        let Some(data) = self.data.read().get(path).cloned() else {
            return StatusCode::NOT_FOUND.into_response();
        };

        if let Some(count) = self.counts.get(path) {
            count.fetch_add(1, Ordering::Relaxed);
        }

        (
            [(header::CONTENT_TYPE, "application/json")],
            data,
        )
            .into_response()
    }
}

pub async fn latency(State(state): State<AppState>) -> Response {
    state.publisher.serve(LATENCY_PATH)
}

pub async fn latencies(State(state): State<AppState>) -> Response {
    state.publisher.serve(LATENCIES_PATH)
}

pub async fn stats(State(state): State<AppState>) -> Response {
    state.publisher.serve(STATS_PATH)
}

//! Region latency mesh
//!
//! Every deployed instance of the app probes every peer region and publishes
//! what it sees, yielding a full region-by-region latency matrix:
//!
//! - Peer discovery via TXT records on the platform naming service
//! - One [`LatencyTracker`] per peer, keeping a moving average of round trips
//! - A [`RegionTracker`] reconciling trackers against the discovered set

use std::time::Duration;

use thiserror::Error;

pub mod mesh;
pub mod probe;
pub mod resolver;

pub use mesh::RegionTracker;
pub use probe::LatencyTracker;
pub use resolver::{deployed_regions, DnsResolver, StaticResolver, TxtResolver};

/// Path serving this instance's row of the matrix.
pub const LATENCY_PATH: &str = "/latency.json";
/// Path serving the full matrix.
pub const LATENCIES_PATH: &str = "/latencies.json";
/// Path serving per-path request counters.
pub const STATS_PATH: &str = "/stats.json";

pub const DEFAULT_SMA_WINDOW: usize = 100;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Mesh errors. Probe and discovery failures are transient: they surface on
/// the tracker error streams and the next tick retries.
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("region tracker: {0}")]
    Discovery(#[from] hickory_resolver::error::ResolveError),
    #[error("region tracker: no TXT record for {0}")]
    NoRecord(String),
    #[error("region tracker: discovery timed out")]
    DiscoveryTimeout,
    #[error("probe: {0}")]
    Io(#[from] std::io::Error),
    #[error("probe response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("probe: {0}")]
    BadResponse(String),
    #[error("probe: response read time not observed")]
    ZeroEnd,
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("{region} tracker: {source}")]
    Peer {
        region: String,
        #[source]
        source: Box<MeshError>,
    },
}

pub type Result<T> = std::result::Result<T, MeshError>;

/// Mesh configuration. The app name and self region come from the
/// environment; they are passed in explicitly so the mesh can run against a
/// synthetic naming service in tests.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    pub app: String,
    pub region: String,
    pub zone: String,
    pub sma_window: usize,
    pub interval: Duration,
}

impl MeshConfig {
    pub fn new(app: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            region: region.into(),
            zone: "internal".to_string(),
            sma_window: DEFAULT_SMA_WINDOW,
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_sma_window(mut self, window: usize) -> Self {
        self.sma_window = window;
        self
    }
}

/// Joins name parts into a dotted hostname, e.g. `ord.myapp.internal`.
pub(crate) fn dns_name(parts: &[&str]) -> String {
    parts.join(".")
}

//! Region-level tracker
//!
//! Reconciles one [`LatencyTracker`] per discovered peer region against the
//! naming service on every interval, and merges the per-peer rows into the
//! full region-by-region matrix.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::resolver::{deployed_regions, TxtResolver};
use crate::{dns_name, LatencyTracker, MeshConfig, MeshError};

/// Shared error-relay backlog across discovery and all peer trackers.
const ERR_BACKLOG: usize = 16;

pub struct RegionTracker {
    cfg: MeshConfig,
    resolver: Arc<dyn TxtResolver>,
    trackers: Mutex<HashMap<String, Arc<LatencyTracker>>>,
    stop: watch::Sender<bool>,
}

impl RegionTracker {
    pub fn new(cfg: MeshConfig, resolver: Arc<dyn TxtResolver>) -> Self {
        Self {
            cfg,
            resolver,
            trackers: Mutex::new(HashMap::new()),
            stop: watch::channel(false).0,
        }
    }

    /// Starts the reconciliation loop. Discovery and probe errors surface on
    /// the returned stream, annotated with the region they came from; the
    /// stream drops errors nobody is reading and closes once on `stop`.
    pub fn run(self: Arc<Self>) -> mpsc::Receiver<MeshError> {
        let (tx, rx) = mpsc::channel(ERR_BACKLOG);
        let mut stop = self.stop.subscribe();
        let mesh = self;

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(mesh.cfg.interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await;

            loop {
                if *stop.borrow() {
                    return;
                }

                mesh.reconcile(&tx).await;

                tokio::select! {
                    _ = stop.changed() => return,
                    _ = tick.tick() => {}
                }
            }
        });

        rx
    }

    /// One reconciliation pass: resolve the deployed set, start trackers for
    /// new peers, stop trackers whose region disappeared.
    async fn reconcile(&self, errc: &mpsc::Sender<MeshError>) {
        let lookup = tokio::time::timeout(
            self.cfg.interval,
            deployed_regions(self.resolver.as_ref(), &self.cfg),
        )
        .await;

        let regions = match lookup {
            Ok(Ok(regions)) => regions,
            Ok(Err(err)) => {
                let _ = errc.try_send(err);
                return;
            }
            Err(_) => {
                let _ = errc.try_send(MeshError::DiscoveryTimeout);
                return;
            }
        };

        let mut trackers = self.trackers.lock();

        // stop may have fired while the lookup was in flight
        if *self.stop.borrow() {
            return;
        }

        for region in &regions {
            if *region == self.cfg.region || trackers.contains_key(region) {
                continue;
            }

            let host = dns_name(&[region, &self.cfg.app, &self.cfg.zone]);
            debug!(%region, %host, "tracking new region");

            let tracker = Arc::new(LatencyTracker::new(
                host,
                self.cfg.sma_window,
                self.cfg.interval,
            ));
            let mut peer_errs = Arc::clone(&tracker).run();
            trackers.insert(region.clone(), tracker);

            let relay = errc.clone();
            let name = region.clone();
            tokio::spawn(async move {
                while let Some(err) = peer_errs.recv().await {
                    let _ = relay.try_send(MeshError::Peer {
                        region: name.clone(),
                        source: Box::new(err),
                    });
                }
            });
        }

        trackers.retain(|region, tracker| {
            let keep = regions.iter().any(|r| r == region);
            if !keep {
                debug!(%region, "region no longer deployed");
                tracker.stop();
            }
            keep
        });
    }

    /// Snapshot of the full matrix: one row per tracked peer (that peer's own
    /// view), plus the self row built from each tracker's moving average.
    /// Rows are individually consistent; the matrix as a whole converges over
    /// successive probes.
    pub fn latencies(&self) -> HashMap<String, HashMap<String, i64>> {
        let trackers = self.trackers.lock();

        let mut matrix = HashMap::with_capacity(trackers.len() + 1);
        let mut self_row = HashMap::with_capacity(trackers.len());
        for (region, tracker) in trackers.iter() {
            matrix.insert(region.clone(), tracker.latencies());
            self_row.insert(region.clone(), tracker.latency_ms());
        }
        matrix.insert(self.cfg.region.clone(), self_row);

        matrix
    }

    /// Stops reconciliation and every peer tracker. Safe to call more than
    /// once.
    pub fn stop(&self) {
        let mut trackers = self.trackers.lock();

        self.stop.send_replace(true);

        for (_, tracker) in trackers.drain() {
            tracker.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StaticResolver;
    use std::time::Duration;

    const TXT_NAME: &str = "regions.best-regions.internal";

    fn test_mesh(regions: &str) -> (Arc<RegionTracker>, Arc<StaticResolver>) {
        let resolver = Arc::new(StaticResolver::default());
        resolver.set(TXT_NAME, vec![regions.to_string()]);

        let cfg = MeshConfig::new("best-regions", "den").with_interval(Duration::from_secs(1));
        let mesh = Arc::new(RegionTracker::new(cfg, resolver.clone()));

        (mesh, resolver)
    }

    fn drain() -> (mpsc::Sender<MeshError>, mpsc::Receiver<MeshError>) {
        mpsc::channel(ERR_BACKLOG)
    }

    #[tokio::test]
    async fn test_reconcile_tracks_peers() {
        let (mesh, _resolver) = test_mesh("den,ord,iad");
        let (tx, _rx) = drain();

        mesh.reconcile(&tx).await;

        let matrix = mesh.latencies();
        let mut regions: Vec<&String> = matrix.keys().collect();
        regions.sort();
        assert_eq!(regions, ["den", "iad", "ord"]);

        // no probes have landed, so the self row is all sentinels
        assert_eq!(matrix["den"]["ord"], i64::MAX);
        assert_eq!(matrix["den"]["iad"], i64::MAX);
        assert!(matrix["ord"].is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_removes_vanished_peers() {
        let (mesh, resolver) = test_mesh("den,ord,iad");
        let (tx, _rx) = drain();

        mesh.reconcile(&tx).await;
        assert_eq!(mesh.trackers.lock().len(), 2);

        resolver.set(TXT_NAME, vec!["den,ord".to_string()]);
        mesh.reconcile(&tx).await;

        let trackers = mesh.trackers.lock();
        assert_eq!(trackers.len(), 1);
        assert!(trackers.contains_key("ord"));
    }

    #[tokio::test]
    async fn test_discovery_error_is_relayed() {
        let (mesh, resolver) = test_mesh("den,ord");
        resolver.remove(TXT_NAME);
        let (tx, mut rx) = drain();

        mesh.reconcile(&tx).await;

        let err = rx.try_recv().expect("discovery error should be relayed");
        assert!(matches!(err, MeshError::NoRecord(_)));
        assert!(mesh.trackers.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (mesh, _resolver) = test_mesh("den,ord,iad");

        let mut errs = mesh.clone().run();
        tokio::time::sleep(Duration::from_millis(20)).await;

        mesh.stop();
        mesh.stop();

        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            while errs.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok(), "stop should close the error stream");
        assert!(mesh.trackers.lock().is_empty());
    }
}

//! Solver rebuild loop
//!
//! Once a second, turns the current latency matrix into (vertex list, lower
//! triangular cost matrix) and rebuilds the solver pair. Requests snapshot
//! the pair under a read lock, so a served request is consistent with a
//! single rebuild cycle; the write lock is held for the swap only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use region_mesh::RegionTracker;
use sink_selector::{BruteForce, IlpSolver};
use tokio::sync::watch;

pub struct SolverPair {
    pub brute: BruteForce,
    pub ilp: IlpSolver,
}

pub struct Model {
    tracker: Arc<RegionTracker>,
    solvers: RwLock<Arc<SolverPair>>,
    stop: watch::Sender<bool>,
}

impl Model {
    pub fn new(tracker: Arc<RegionTracker>) -> Self {
        let pair = build_pair(&tracker.latencies());

        Self {
            tracker,
            solvers: RwLock::new(Arc::new(pair)),
            stop: watch::channel(false).0,
        }
    }

    /// The most recently built solver pair.
    pub fn snapshot(&self) -> Arc<SolverPair> {
        self.solvers.read().clone()
    }

    pub fn run(self: Arc<Self>) {
        let mut stop = self.stop.subscribe();
        let model = self;

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop.changed() => return,
                    _ = tick.tick() => {}
                }

                let pair = build_pair(&model.tracker.latencies());
                *model.solvers.write() = Arc::new(pair);
            }
        });
    }

    pub fn stop(&self) {
        self.stop.send_replace(true);
    }
}

pub(crate) fn build_pair(latencies: &HashMap<String, HashMap<String, i64>>) -> SolverPair {
    let (vertices, edge_costs) = model_params(latencies);

    SolverPair {
        brute: BruteForce::new(vertices.clone(), edge_costs.clone()),
        ilp: IlpSolver::new(vertices, edge_costs),
    }
}

/// Derives solver input from the latency matrix. The vertex set is the union
/// of row keys and sub-keys, in case peers know regions we don't. Costs are
/// symmetrized: both directions present takes their mean, one direction is
/// used as-is, and a missing pair gets a sentinel far above any real cost.
pub(crate) fn model_params(
    latencies: &HashMap<String, HashMap<String, i64>>,
) -> (Vec<String>, Vec<Vec<f64>>) {
    let mut vertices: Vec<String> = Vec::new();
    for (region, row) in latencies {
        for name in std::iter::once(region).chain(row.keys()) {
            if !vertices.contains(name) {
                vertices.push(name.clone());
            }
        }
    }
    vertices.sort();

    let cost = |a: &str, b: &str| -> Option<f64> {
        latencies.get(a).and_then(|row| row.get(b)).map(|&ms| ms as f64)
    };

    let mut edge_costs = Vec::with_capacity(vertices.len().saturating_sub(1));
    for i in 1..vertices.len() {
        let mut row = Vec::with_capacity(i);
        for j in 0..i {
            let ij = cost(&vertices[i], &vertices[j]);
            let ji = cost(&vertices[j], &vertices[i]);
            row.push(match (ij, ji) {
                (Some(ij), Some(ji)) => (ij + ji) / 2.0,
                (Some(ij), None) => ij,
                (None, Some(ji)) => ji,
                // no data about this pair; assume it's expensive
                (None, None) => f64::MAX,
            });
        }
        edge_costs.push(row);
    }

    (vertices, edge_costs)
}

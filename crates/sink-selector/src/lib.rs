//! Weighted K-facility selection
//!
//! Given a symmetric cost matrix over named vertices and a per-vertex
//! traffic weight vector, choose the K vertices ("sinks") minimizing
//!
//! ```text
//! sum_source weight(source) * min_{sink in S} cost(source, sink)
//! ```
//!
//! Two interchangeable solvers: [`BruteForce`] enumerates every K-subset and
//! is exact but exponential; [`IlpSolver`] encodes the same problem as a 0/1
//! integer program and scales to larger K. Both agree on identical input.
//!
//! Cost matrices are lower-triangular: `edge_costs[i-1][j]` holds the cost
//! between vertex `i` and vertex `j` for `j < i`. Missing pairs use a
//! sentinel far above any real cost.

use thiserror::Error;

pub mod brute;
pub mod combo;
pub mod ilp;

pub use brute::BruteForce;
pub use combo::Combinations;
pub use ilp::IlpSolver;

#[derive(Error, Debug)]
pub enum SolveError {
    #[error("unknown vertex {0:?}")]
    UnknownVertex(String),
    #[error("{0} solution")]
    NotOptimal(String),
}

pub type Result<T> = std::result::Result<T, SolveError>;

/// A K-facility solver: given K and a weight vector aligned with the vertex
/// list, return the minimum expected cost and the chosen vertices in sorted
/// order.
pub trait Solver {
    fn solve(&self, k: usize, weights: &[f64]) -> Result<(f64, Vec<String>)>;
}

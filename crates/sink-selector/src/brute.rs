//! Exhaustive solver
//!
//! Evaluates every K-subset against the weighted cost matrix. Exact, and
//! fast enough for small K; the gateway switches to the ILP above that.

use std::collections::HashMap;

use crate::combo::Combinations;
use crate::{Result, SolveError, Solver};

pub struct BruteForce {
    pub vertices: Vec<String>,
    pub edge_costs: Vec<Vec<f64>>,
    vmap: HashMap<String, usize>,
}

impl BruteForce {
    /// `edge_costs` is the lower triangle: `edge_costs[i-1][j]` is the cost
    /// between vertex `i` and vertex `j`, for `j < i`.
    pub fn new(vertices: Vec<String>, edge_costs: Vec<Vec<f64>>) -> Self {
        let vmap = vertices
            .iter()
            .enumerate()
            .map(|(i, v)| (v.clone(), i))
            .collect();

        Self {
            vertices,
            edge_costs,
            vmap,
        }
    }

    /// Expands the triangle into a full matrix scaled by source weight:
    /// `wec[s][d] = weight[s] * cost(s, d)`. Symmetric in cost, asymmetric
    /// in weight.
    fn weighted_edge_costs(&self, weights: &[f64]) -> Vec<Vec<f64>> {
        let n = self.vertices.len();
        let mut wec = vec![vec![0.0; n]; n];

        for (row, costs) in self.edge_costs.iter().enumerate() {
            let a = row + 1;
            for (b, &cost) in costs.iter().enumerate() {
                wec[a][b] = weights[a] * cost;
                wec[b][a] = weights[b] * cost;
            }
        }

        wec
    }

    /// Cost of routing every vertex to its cheapest sink in `combo`. A
    /// member of the combo routes to itself at zero cost.
    fn combo_cost(&self, wec: &[Vec<f64>], combo: &[usize]) -> f64 {
        let mut total = 0.0;

        for source in 0..self.vertices.len() {
            let mut best = f64::MAX;
            for &sink in combo {
                let cost = wec[source][sink];
                if cost < best {
                    best = cost;
                    if cost == 0.0 {
                        break;
                    }
                }
            }
            total += best;
        }

        total
    }

    /// Evaluates a caller-supplied subset under the given weights, without
    /// any claim of optimality.
    pub fn combination_cost(&self, combo: &[String], weights: &[f64]) -> Result<f64> {
        let mut icombo = Vec::with_capacity(combo.len());
        for name in combo {
            let &i = self
                .vmap
                .get(name)
                .ok_or_else(|| SolveError::UnknownVertex(name.clone()))?;
            icombo.push(i);
        }

        let wec = self.weighted_edge_costs(weights);

        Ok(self.combo_cost(&wec, &icombo))
    }
}

impl Solver for BruteForce {
    fn solve(&self, k: usize, weights: &[f64]) -> Result<(f64, Vec<String>)> {
        let wec = self.weighted_edge_costs(weights);

        let mut best = vec![0; k];
        let mut best_cost = f64::MAX;

        let mut combos = Combinations::new(self.vertices.len(), k);
        while let Some(combo) = combos.advance() {
            let cost = self.combo_cost(&wec, combo);
            // strict less keeps the first of a tie, so ties break
            // deterministically in enumeration order
            if cost < best_cost {
                best.copy_from_slice(combo);
                best_cost = cost;
            }
        }

        let mut picks: Vec<String> = best.iter().map(|&i| self.vertices[i].clone()).collect();
        picks.sort();

        Ok((best_cost, picks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A-B=60, A-C=30, B-C=30; weights A=0.4, B=0.3, C=0.3.
    fn triangle() -> BruteForce {
        BruteForce::new(
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            vec![vec![60.0], vec![30.0, 30.0]],
        )
    }

    const TRIANGLE_WEIGHTS: [f64; 3] = [0.4, 0.3, 0.3];

    #[test]
    fn test_single_sink_follows_weight() {
        let bf = triangle();

        let (cost, picks) = bf.solve(1, &TRIANGLE_WEIGHTS).unwrap();

        // c serves a at 0.4*30 and b at 0.3*30; cheaper than hosting at a
        assert_eq!(picks, vec!["c"]);
        assert!((cost - 21.0).abs() < 1e-9, "cost={cost}");
    }

    #[test]
    fn test_k_equals_n_is_free() {
        let bf = triangle();

        let (cost, picks) = bf.solve(3, &TRIANGLE_WEIGHTS).unwrap();

        assert_eq!(cost, 0.0);
        assert_eq!(picks, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_all_zero_weights_takes_first_subset() {
        let bf = triangle();

        let (cost, picks) = bf.solve(2, &[0.0, 0.0, 0.0]).unwrap();

        assert_eq!(cost, 0.0);
        assert_eq!(picks, vec!["a", "b"]);
    }

    #[test]
    fn test_combination_cost() {
        let bf = triangle();

        let cost = bf
            .combination_cost(&["a".to_string()], &TRIANGLE_WEIGHTS)
            .unwrap();
        // a serves b at 0.3*60 and c at 0.3*30
        assert!((cost - 27.0).abs() < 1e-9, "cost={cost}");

        let err = bf
            .combination_cost(&["zzz".to_string()], &TRIANGLE_WEIGHTS)
            .unwrap_err();
        assert!(matches!(err, SolveError::UnknownVertex(_)));
    }
}

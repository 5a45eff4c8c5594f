//! Integer-programming solver
//!
//! Encodes K-facility selection as a 0/1 program over `n + n*(n-1)` binary
//! columns:
//!
//! - `x_v` (column `v`): vertex `v` is a chosen sink
//! - `y_{s,d}` (column `edge(s, d)`): source `s` is assigned to sink `d`
//!
//! with `x_d - y_{s,d} >= 0` for every ordered pair (assignment only to
//! chosen sinks) and `x_s + sum_d y_{s,d} = 1` for every vertex (chosen, or
//! assigned to exactly one sink). Per request the solver adds
//! `sum_v x_v = k` and minimizes `sum weight[s] * cost(s,d) * y_{s,d}`.
//! Costs are non-negative, so a minimizer assigns every source to its
//! cheapest chosen sink and the objective matches the brute-force one.

use good_lp::{constraint, default_solver, variable, variables, Expression, Solution, SolverModel, Variable};

use crate::{Result, SolveError, Solver};

/// `x_d - y_{s,d} >= 0`, stored as (sink column, edge column).
type AssignRow = (usize, usize);

pub struct IlpSolver {
    pub vertices: Vec<String>,
    pub edge_costs: Vec<Vec<f64>>,
    assign_rows: Vec<AssignRow>,
    cover_rows: Vec<Vec<usize>>,
}

impl IlpSolver {
    /// Builds the structural constraint rows once; [`solve`](Solver::solve)
    /// reuses them for every request against this matrix.
    pub fn new(vertices: Vec<String>, edge_costs: Vec<Vec<f64>>) -> Self {
        let n = vertices.len();
        let mut solver = Self {
            vertices,
            edge_costs,
            assign_rows: Vec::with_capacity(n * n.saturating_sub(1)),
            cover_rows: Vec::with_capacity(n),
        };

        for source in 0..n {
            let mut cover = Vec::with_capacity(n);
            cover.push(source);

            for sink in 0..n {
                if source == sink {
                    continue;
                }
                let edge = solver.edge(source, sink);
                cover.push(edge);
                solver.assign_rows.push((sink, edge));
            }

            solver.cover_rows.push(cover);
        }

        solver
    }

    /// Column of `y_{source,sink}`. The `x` columns occupy `[0, n)`; edge
    /// columns are laid out in source-major order with the diagonal skipped.
    /// Constraint construction and solution read-out must agree on this.
    fn edge(&self, source: usize, sink: usize) -> usize {
        if source == sink {
            panic!("edge({source}, {sink}): source=sink");
        }

        let n = self.vertices.len();

        n + source * (n - 1) + if sink > source { sink - 1 } else { sink }
    }
}

impl Solver for IlpSolver {
    fn solve(&self, k: usize, weights: &[f64]) -> Result<(f64, Vec<String>)> {
        let n = self.vertices.len();
        let ncols = n + n * n.saturating_sub(1);

        let mut problem = variables!();
        let cols: Vec<Variable> = (0..ncols)
            .map(|_| problem.add(variable().binary()))
            .collect();

        let mut objective = Expression::default();
        for (row, costs) in self.edge_costs.iter().enumerate() {
            let a = row + 1;
            for (b, &cost) in costs.iter().enumerate() {
                objective += cols[self.edge(a, b)] * (cost * weights[a]);
                objective += cols[self.edge(b, a)] * (cost * weights[b]);
            }
        }

        let mut chosen = Expression::default();
        for &x in &cols[..n] {
            chosen += x;
        }

        let mut model = problem.minimise(objective.clone()).using(default_solver);
        for &(sink, edge) in &self.assign_rows {
            model = model.with(constraint!(cols[sink] - cols[edge] >= 0.0));
        }
        for cover in &self.cover_rows {
            let mut row = Expression::default();
            for &col in cover {
                row += cols[col];
            }
            model = model.with(constraint!(row == 1.0));
        }
        model = model.with(constraint!(chosen == k as f64));

        let solution = model
            .solve()
            .map_err(|err| SolveError::NotOptimal(err.to_string()))?;

        let mut picks = Vec::with_capacity(k);
        for (v, name) in self.vertices.iter().enumerate() {
            if solution.value(cols[v]) > 0.5 {
                picks.push(name.clone());
            }
        }
        picks.sort();

        Ok((objective.eval_with(&solution), picks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BruteForce;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_edge_column_layout() {
        // cols - A, B, C, AB, AC, BA, BC, CA, CB
        //        0  1  2  3   4   5   6   7   8
        let solver = IlpSolver::new(
            vec!["A".to_string(), "B".to_string(), "C".to_string()],
            vec![],
        );
        let (a, b, c) = (0, 1, 2);

        assert_eq!(solver.edge(a, b), 3);
        assert_eq!(solver.edge(a, c), 4);
        assert_eq!(solver.edge(b, a), 5);
        assert_eq!(solver.edge(b, c), 6);
        assert_eq!(solver.edge(c, a), 7);
        assert_eq!(solver.edge(c, b), 8);
    }

    #[test]
    #[should_panic(expected = "source=sink")]
    fn test_edge_rejects_self_loop() {
        let solver = IlpSolver::new(vec!["A".to_string(), "B".to_string()], vec![]);
        solver.edge(1, 1);
    }

    #[test]
    fn test_single_sink_follows_weight() {
        let solver = IlpSolver::new(
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            vec![vec![60.0], vec![30.0, 30.0]],
        );

        let (cost, picks) = solver.solve(1, &[0.4, 0.3, 0.3]).unwrap();

        assert_eq!(picks, vec!["c"]);
        assert!((cost - 21.0).abs() < 1e-6, "cost={cost}");
    }

    #[test]
    fn test_k_equals_n_is_free() {
        let solver = IlpSolver::new(
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            vec![vec![60.0], vec![30.0, 30.0]],
        );

        let (cost, picks) = solver.solve(3, &[0.4, 0.3, 0.3]).unwrap();

        assert!(cost.abs() < 1e-9);
        assert_eq!(picks, vec!["a", "b", "c"]);
    }

    fn test_data(n: usize, rng: &mut StdRng) -> (Vec<String>, Vec<Vec<f64>>, Vec<f64>) {
        let vertices = (0..n).map(|i| format!("{i:02x}")).collect();

        let edge_costs = (0..n - 1)
            .map(|i| (0..=i).map(|_| rng.gen::<f64>() * 200.0).collect())
            .collect();

        let weights = (0..n).map(|_| rng.gen()).collect();

        (vertices, edge_costs, weights)
    }

    #[test]
    fn test_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for n in 2..=12 {
            let (vertices, edge_costs, weights) = test_data(n, &mut rng);
            let bf = BruteForce::new(vertices.clone(), edge_costs.clone());
            let ilp = IlpSolver::new(vertices, edge_costs);

            for k in 1..n {
                let (bf_cost, bf_picks) = bf.solve(k, &weights).unwrap();
                let (ilp_cost, ilp_picks) = ilp.solve(k, &weights).unwrap();

                assert!(
                    (bf_cost - ilp_cost).abs() / bf_cost < 1e-4,
                    "{n}-choose-{k}: expected {ilp_cost} to be near {bf_cost}",
                );
                assert_eq!(bf_picks, ilp_picks, "{n}-choose-{k}");
            }
        }
    }
}

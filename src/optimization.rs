//! The Optimization Model (§4.6): a pluggable abstraction over the two
//! constrained subproblems Estimation solves for every sibling group —
//! non-negative real projection, then integer rounding. The two stages are
//! different enough in kind (a closed-form QP vs. a mixed-integer program)
//! that they are exposed as two small trait seams, `RealProjector` and
//! `IntegerRounder`, rather than forcing one concrete type to implement
//! both; `ActiveSetProjector` and `GoodLpRounder` are the shipped
//! implementations of each.

use good_lp::solvers::microlp::microlp;
use good_lp::{constraint, variable, variables, Expression, Solution, SolverModel};

use crate::config::{ConstraintRow, Sense};
use crate::error::EngineError;

/// One child's target vector (Stage A only) and the user-declared
/// constraint rows that apply to its own vector at its level.
pub struct ChildProblem<'a> {
    pub target: &'a [f64],
    pub constraints: &'a [ConstraintRow],
}

/// The joint problem Estimation poses once per parent, so the parent-sum
/// equality can be enforced across all of a parent's children at once
/// instead of child-by-child.
pub struct JointProblem<'a> {
    pub children: Vec<ChildProblem<'a>>,
    pub basis_len: usize,
    /// `v_est(parent)`, the shared per-component right-hand side; `None`
    /// only for the root's single-node problem, which has no parent sum.
    pub parent_total: Option<&'a [i64]>,
}

/// `Sync` so independent sibling-groups at the same level (spec §5's
/// second permitted parallel site) can share one projector/rounder across
/// the rayon tasks that solve them.
pub trait RealProjector: Sync {
    fn solve_non_negative_real(&self, problem: &JointProblem) -> Result<Vec<Vec<f64>>, EngineError>;
}

pub trait IntegerRounder: Sync {
    fn solve_rounding(&self, problem: &JointProblem, reals: &[Vec<f64>]) -> Result<Vec<Vec<i64>>, EngineError>;
}

/// Stage A: an in-process active-set solver for the non-negative
/// least-squares projection with linear equality/inequality side
/// constraints. No external solver dependency, since the objective is
/// always a simple diagonal-metric NNLS.
pub struct ActiveSetProjector;

impl RealProjector for ActiveSetProjector {
    fn solve_non_negative_real(&self, problem: &JointProblem) -> Result<Vec<Vec<f64>>, EngineError> {
        let n_children = problem.children.len();
        let basis_len = problem.basis_len;
        let n_vars = n_children * basis_len;

        let target: Vec<f64> = problem.children.iter().flat_map(|c| c.target.iter().copied()).collect();

        let mut eq_rows: Vec<Vec<f64>> = Vec::new();
        let mut eq_rhs: Vec<f64> = Vec::new();
        if let Some(parent) = problem.parent_total {
            for i in 0..basis_len {
                let mut row = vec![0.0; n_vars];
                for c in 0..n_children {
                    row[c * basis_len + i] = 1.0;
                }
                eq_rows.push(row);
                eq_rhs.push(parent[i] as f64);
            }
        }

        let mut ineq_rows: Vec<Vec<f64>> = Vec::new();
        let mut ineq_rhs: Vec<f64> = Vec::new();
        for (c, child) in problem.children.iter().enumerate() {
            for row in child.constraints {
                let mut full = vec![0.0; n_vars];
                let block = &mut full[c * basis_len..(c + 1) * basis_len];
                match row.sense {
                    Sense::Eq => {
                        block.copy_from_slice(&row.coefficients);
                        eq_rows.push(full);
                        eq_rhs.push(row.rhs);
                    }
                    Sense::Le => {
                        block.copy_from_slice(&row.coefficients);
                        ineq_rows.push(full);
                        ineq_rhs.push(row.rhs);
                    }
                    Sense::Ge => {
                        for (dst, &src) in block.iter_mut().zip(&row.coefficients) {
                            *dst = -src;
                        }
                        ineq_rows.push(full);
                        ineq_rhs.push(-row.rhs);
                    }
                }
            }
        }

        let x = active_set_nnls(&target, n_vars, &eq_rows, &eq_rhs, &ineq_rows, &ineq_rhs).ok_or_else(|| {
            EngineError::infeasible(
                "estimation.stage_a",
                "/",
                "no point satisfies the parent-sum and declared constraints jointly",
            )
        })?;

        Ok(x.chunks(basis_len).map(<[f64]>::to_vec).collect())
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Active-set NNLS with linear equality and inequality side constraints.
/// Bound-active variables and triggered inequality rows are only ever
/// added to the working set, never relaxed once activated — sufficient
/// for the monotone total/marginal constraints this engine expects, if
/// not a fully general active-set QP.
///
/// Returns `None` when the working equality set is inconsistent (the
/// residual check below), which is how a root-vs-children total mismatch
/// surfaces as infeasibility.
fn active_set_nnls(
    target: &[f64],
    n_vars: usize,
    eq_rows: &[Vec<f64>],
    eq_rhs: &[f64],
    ineq_rows: &[Vec<f64>],
    ineq_rhs: &[f64],
) -> Option<Vec<f64>> {
    const TOL: f64 = 1e-6;
    let max_iter = n_vars + ineq_rows.len() * 2 + 64;

    let mut fixed_zero = vec![false; n_vars];
    let mut ineq_active = vec![false; ineq_rows.len()];

    for _ in 0..max_iter {
        let free: Vec<usize> = (0..n_vars).filter(|&j| !fixed_zero[j]).collect();
        if free.is_empty() {
            return Some(vec![0.0; n_vars]);
        }

        let mut active_rows: Vec<&Vec<f64>> = eq_rows.iter().collect();
        let mut active_rhs: Vec<f64> = eq_rhs.to_vec();
        for (r, &on) in ineq_active.iter().enumerate() {
            if on {
                active_rows.push(&ineq_rows[r]);
                active_rhs.push(ineq_rhs[r]);
            }
        }
        let m = active_rows.len();

        let (x_free, lambda) = if m == 0 {
            (free.iter().map(|&j| target[j].max(0.0)).collect::<Vec<f64>>(), Vec::new())
        } else {
            let t_f: Vec<f64> = free.iter().map(|&j| target[j]).collect();
            let a_f: Vec<Vec<f64>> = active_rows.iter().map(|row| free.iter().map(|&j| row[j]).collect()).collect();

            let mut gram = vec![vec![0.0; m]; m];
            let mut rhs = vec![0.0; m];
            for p in 0..m {
                rhs[p] = dot(&a_f[p], &t_f) - active_rhs[p];
                for q in 0..m {
                    gram[p][q] = dot(&a_f[p], &a_f[q]);
                }
            }
            let mu = solve_linear_system(&gram, &rhs)?;
            let x_free: Vec<f64> = (0..free.len())
                .map(|k| t_f[k] - (0..m).map(|p| a_f[p][k] * mu[p]).sum::<f64>())
                .collect();

            let consistent = a_f.iter().zip(active_rhs.iter()).all(|(row, &b)| (dot(row, &x_free) - b).abs() < 1e-4);
            if !consistent {
                return None;
            }
            (x_free, mu)
        };

        if let Some((pos, _)) =
            x_free.iter().enumerate().filter(|&(_, &v)| v < -TOL).min_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        {
            fixed_zero[free[pos]] = true;
            continue;
        }

        let mut x = vec![0.0; n_vars];
        for (k, &j) in free.iter().enumerate() {
            x[j] = x_free[k].max(0.0);
        }

        let worst_violation = ineq_rows
            .iter()
            .zip(ineq_rhs.iter())
            .enumerate()
            .filter(|&(r, _)| !ineq_active[r])
            .map(|(r, (row, &rhs))| (r, dot(row, &x) - rhs))
            .filter(|&(_, v)| v > TOL)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        if let Some((r, _)) = worst_violation {
            ineq_active[r] = true;
            continue;
        }

        if fixed_zero.iter().any(|&z| z) {
            let reentry = (0..n_vars)
                .filter(|&j| fixed_zero[j])
                .map(|j| {
                    let a_col_dot_mu: f64 = active_rows.iter().zip(lambda.iter()).map(|(row, &mu)| row[j] * mu).sum();
                    (j, target[j] + a_col_dot_mu)
                })
                .filter(|&(_, reduced_cost)| reduced_cost > TOL)
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
            if let Some((j, _)) = reentry {
                fixed_zero[j] = false;
                continue;
            }
        }

        return Some(x);
    }
    None
}

/// Gaussian elimination with partial pivoting; a near-zero pivot is
/// nudged rather than rejected, since the active-set loop above already
/// checks the resulting residual for genuine inconsistency.
fn solve_linear_system(a: &[Vec<f64>], b: &[f64]) -> Option<Vec<f64>> {
    let n = b.len();
    if n == 0 {
        return Some(Vec::new());
    }
    let mut aug: Vec<Vec<f64>> = a
        .iter()
        .zip(b)
        .map(|(row, &rhs)| {
            let mut r = row.clone();
            r.push(rhs);
            r
        })
        .collect();

    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| aug[i][col].abs().partial_cmp(&aug[j][col].abs()).unwrap())?;
        aug.swap(col, pivot);
        if aug[col][col].abs() < 1e-10 {
            aug[col][col] += 1e-8;
        }
        let pivot_val = aug[col][col];
        for k in col..=n {
            aug[col][k] /= pivot_val;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = aug[row][col];
            if factor != 0.0 {
                for k in col..=n {
                    aug[row][k] -= factor * aug[col][k];
                }
            }
        }
    }
    Some((0..n).map(|i| aug[i][n]).collect())
}

/// Stage B: the L1 rounding problem, encoded as a MIP (auxiliary
/// variables bounding `|y - x*|`) and discharged via `good_lp`'s
/// pure-Rust `microlp` backend — no system solver dependency, and the
/// retrieved example pack has no LP/MIP crate of its own to imitate.
pub struct GoodLpRounder;

impl IntegerRounder for GoodLpRounder {
    fn solve_rounding(&self, problem: &JointProblem, reals: &[Vec<f64>]) -> Result<Vec<Vec<i64>>, EngineError> {
        let n_children = problem.children.len();
        let basis_len = problem.basis_len;

        let mut vars = variables!();
        let y: Vec<Vec<_>> = (0..n_children)
            .map(|_| (0..basis_len).map(|_| vars.add(variable().integer().min(0.0))).collect())
            .collect();
        let aux: Vec<Vec<_>> = (0..n_children)
            .map(|_| (0..basis_len).map(|_| vars.add(variable().min(0.0))).collect())
            .collect();

        let objective = aux.iter().flatten().fold(Expression::from(0), |acc, &a| acc + a);
        let mut model = vars.minimise(objective).using(microlp);

        for c in 0..n_children {
            for i in 0..basis_len {
                let x_star = reals[c][i];
                model = model.with(constraint!(aux[c][i] >= y[c][i] - x_star));
                model = model.with(constraint!(aux[c][i] >= x_star - y[c][i]));
            }
        }

        if let Some(parent) = problem.parent_total {
            for i in 0..basis_len {
                let sum = (0..n_children).fold(Expression::from(0), |acc, c| acc + y[c][i]);
                model = model.with(constraint!(sum == parent[i] as f64));
            }
        }

        for (c, child) in problem.children.iter().enumerate() {
            for row in child.constraints {
                let expr = (0..basis_len).fold(Expression::from(0), |acc, i| acc + row.coefficients[i] * y[c][i]);
                model = match row.sense {
                    Sense::Eq => model.with(constraint!(expr == row.rhs)),
                    Sense::Le => model.with(constraint!(expr <= row.rhs)),
                    Sense::Ge => model.with(constraint!(expr >= row.rhs)),
                };
            }
        }

        let solution = model.solve().map_err(|e| classify_solver_error("estimation.stage_b", e))?;

        Ok(y.iter().map(|row| row.iter().map(|&v| solution.value(v).round() as i64).collect()).collect())
    }
}

fn classify_solver_error(phase: &str, err: impl std::fmt::Display) -> EngineError {
    let message = err.to_string();
    if message.to_lowercase().contains("infeasible") {
        EngineError::infeasible(phase, "/", message)
    } else {
        EngineError::solver(phase, "/", 1, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConstraintRow;

    #[test]
    fn active_set_respects_parent_sum_with_no_children_constraints() {
        let target_c0 = [3.0, 2.0];
        let target_c1 = [1.0, 4.0];
        let parent = [4i64, 6];
        let problem = JointProblem {
            children: vec![
                ChildProblem { target: &target_c0, constraints: &[] },
                ChildProblem { target: &target_c1, constraints: &[] },
            ],
            basis_len: 2,
            parent_total: Some(&parent),
        };
        let x = ActiveSetProjector.solve_non_negative_real(&problem).unwrap();
        for i in 0..2 {
            assert!((x[0][i] + x[1][i] - parent[i] as f64).abs() < 1e-6);
        }
        for row in &x {
            for &v in row {
                assert!(v >= -1e-9);
            }
        }
    }

    #[test]
    fn active_set_root_single_node_honors_total_constraint() {
        let target = [60.0, 40.0];
        let total_row = ConstraintRow::total_equals(2, 100.0);
        let constraints = [total_row];
        let problem = JointProblem {
            children: vec![ChildProblem { target: &target, constraints: &constraints }],
            basis_len: 2,
            parent_total: None,
        };
        let x = ActiveSetProjector.solve_non_negative_real(&problem).unwrap();
        assert!((x[0][0] + x[0][1] - 100.0).abs() < 1e-6);
    }

    #[test]
    fn active_set_detects_conflicting_totals_as_infeasible() {
        let target_c0 = [50.0];
        let target_c1 = [40.0];
        let c0_total = ConstraintRow::total_equals(1, 50.0);
        let c1_total = ConstraintRow::total_equals(1, 40.0);
        let c0_rows = [c0_total];
        let c1_rows = [c1_total];
        let parent = [100i64];
        let problem = JointProblem {
            children: vec![
                ChildProblem { target: &target_c0, constraints: &c0_rows },
                ChildProblem { target: &target_c1, constraints: &c1_rows },
            ],
            basis_len: 1,
            parent_total: Some(&parent),
        };
        assert!(ActiveSetProjector.solve_non_negative_real(&problem).is_err());
    }

    #[test]
    fn good_lp_rounds_to_integers_honoring_parent_sum() {
        let reals = vec![vec![2.4, 1.6], vec![0.6, 3.4]];
        let parent = [3i64, 5];
        let problem = JointProblem {
            children: vec![
                ChildProblem { target: &[], constraints: &[] },
                ChildProblem { target: &[], constraints: &[] },
            ],
            basis_len: 2,
            parent_total: Some(&parent),
        };
        let y = GoodLpRounder.solve_rounding(&problem, &reals).unwrap();
        for i in 0..2 {
            assert_eq!(y[0][i] + y[1][i], parent[i]);
        }
        for row in &y {
            for &v in row {
                assert!(v >= 0);
            }
        }
    }
}

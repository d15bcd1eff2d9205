//! Estimation (§4.5): top-down, breadth-first constrained optimization that
//! turns noisy vectors into estimated ones, solving each parent's children
//! jointly so parent-sum consistency is enforced by the problem itself
//! rather than patched in afterward.

use rayon::prelude::*;

use crate::basis::PermutationBasis;
use crate::cancel::CancellationFlag;
use crate::config::{Config, ConstraintRow};
use crate::error::EngineError;
use crate::optimization::{ChildProblem, IntegerRounder, JointProblem, RealProjector};
use crate::tree::{GeographicTree, NodeId};

/// Transient solver failures are retried this many times before the run
/// aborts; infeasible constraints are never retried, since resolving is
/// deterministic from the same input.
pub const DEFAULT_MAX_SOLVER_ATTEMPTS: u32 = 3;

pub struct Estimator<'a> {
    projector: &'a dyn RealProjector,
    rounder: &'a dyn IntegerRounder,
    config: &'a Config,
    basis: &'a PermutationBasis,
    max_solver_attempts: u32,
}

/// Everything one parent's sibling-group problem needs, read out of the
/// tree up front so the problem can be solved on a rayon task without
/// borrowing the tree itself.
struct ChildGroupJob<'a> {
    children: Vec<NodeId>,
    targets: Vec<Vec<f64>>,
    constraints: &'a [ConstraintRow],
    parent_total: Vec<i64>,
}

impl<'a> Estimator<'a> {
    pub fn new(projector: &'a dyn RealProjector, rounder: &'a dyn IntegerRounder, config: &'a Config, basis: &'a PermutationBasis) -> Self {
        Self { projector, rounder, config, basis, max_solver_attempts: DEFAULT_MAX_SOLVER_ATTEMPTS }
    }

    pub fn with_max_solver_attempts(mut self, attempts: u32) -> Self {
        self.max_solver_attempts = attempts;
        self
    }

    /// Estimates the whole tree, root first. Use `run_from` for resume,
    /// which seeds the frontier with the extended levels' parents instead.
    pub fn run(&self, tree: &mut GeographicTree, cancel: &CancellationFlag) -> Result<(), EngineError> {
        if cancel.is_set() {
            return Err(EngineError::interrupted("estimation", "root"));
        }
        self.estimate_root(tree)?;
        self.run_from(tree, &[GeographicTree::ROOT], cancel)
    }

    /// Resume entry point: estimates everything reachable below the given
    /// already-estimated parents, without touching the root.
    ///
    /// Processes one tree level at a time: every parent in the current
    /// frontier already has `v_est`, so its children form a sibling-group
    /// problem independent of every other parent's at the same level — the
    /// one site besides per-node component sampling (`measurement.rs`)
    /// where spec §5 permits parallelism, since distinct parents never
    /// share a child variable. The cancellation flag is checked once per
    /// frontier, i.e. between levels.
    pub fn run_from(&self, tree: &mut GeographicTree, seed_parents: &[NodeId], cancel: &CancellationFlag) -> Result<(), EngineError> {
        let mut frontier: Vec<NodeId> = seed_parents.to_vec();

        while !frontier.is_empty() {
            if cancel.is_set() {
                return Err(EngineError::interrupted("estimation", format!("frontier={frontier:?}")));
            }

            let mut jobs: Vec<ChildGroupJob> = Vec::new();
            for &parent in &frontier {
                let children = tree.children_of(parent).to_vec();
                if children.is_empty() {
                    continue;
                }
                jobs.push(self.build_job(tree, parent, children)?);
            }

            let solved: Vec<Result<(Vec<NodeId>, Vec<Vec<i64>>), EngineError>> = jobs
                .par_iter()
                .map(|job| self.solve_job(job).map(|ints| (job.children.clone(), ints)))
                .collect();

            let mut next_frontier = Vec::new();
            for result in solved {
                let (children, ints) = result?;
                for (k, &id) in children.iter().enumerate() {
                    tree.node_mut(id).v_est = Some(ints[k].clone());
                }
                next_frontier.extend(children);
            }
            frontier = next_frontier;
        }
        Ok(())
    }

    /// Reads everything a sibling-group's problem needs out of the tree —
    /// targets, parent total — while the tree is still only borrowed
    /// immutably, so the resulting job carries no reference back into it
    /// and can be solved from a rayon task.
    fn build_job(&self, tree: &GeographicTree, parent: NodeId, children: Vec<NodeId>) -> Result<ChildGroupJob<'a>, EngineError> {
        let parent_total = tree
            .node(parent)
            .v_est
            .clone()
            .ok_or_else(|| EngineError::state("estimation", format!("node {parent} has no v_est yet")))?;
        let level = tree.node(children[0]).level;
        let constraints: &'a [ConstraintRow] =
            self.config.geo_constraints.get(&level).map(Vec::as_slice).unwrap_or(&[]);

        let targets: Vec<Vec<f64>> = children
            .iter()
            .map(|&id| {
                tree.node(id)
                    .v_noisy
                    .clone()
                    .ok_or_else(|| EngineError::state("estimation", format!("node {id} has no v_noisy; Measurement has not run")))
                    .map(|v| v.iter().map(|&x| x as f64).collect())
            })
            .collect::<Result<_, _>>()?;

        Ok(ChildGroupJob { children, targets, constraints, parent_total })
    }

    fn solve_job(&self, job: &ChildGroupJob) -> Result<Vec<Vec<i64>>, EngineError> {
        let child_problems: Vec<ChildProblem> =
            job.targets.iter().map(|t| ChildProblem { target: t, constraints: job.constraints }).collect();
        let problem = JointProblem { children: child_problems, basis_len: self.basis.len(), parent_total: Some(&job.parent_total) };

        let reals = self.projector.solve_non_negative_real(&problem)?;
        self.solve_rounding_with_retry(&problem, &reals)
    }

    fn estimate_root(&self, tree: &mut GeographicTree) -> Result<(), EngineError> {
        let v_noisy = tree
            .root()
            .v_noisy
            .clone()
            .ok_or_else(|| EngineError::state("estimation", "root has no v_noisy; Measurement has not run"))?;
        let target: Vec<f64> = v_noisy.iter().map(|&v| v as f64).collect();

        let problem = JointProblem {
            children: vec![ChildProblem { target: &target, constraints: &self.config.root_constraints }],
            basis_len: self.basis.len(),
            parent_total: None,
        };

        let reals = self.projector.solve_non_negative_real(&problem)?;
        let mut ints = self.solve_rounding_with_retry(&problem, &reals)?;
        let v_est = ints.pop().unwrap_or_else(|| unreachable!("root problem always poses exactly one child"));
        tree.node_mut(GeographicTree::ROOT).v_est = Some(v_est);
        Ok(())
    }

    fn solve_rounding_with_retry(&self, problem: &JointProblem, reals: &[Vec<f64>]) -> Result<Vec<Vec<i64>>, EngineError> {
        let mut last_err: Option<EngineError> = None;
        for attempt in 1..=self.max_solver_attempts {
            match self.rounder.solve_rounding(problem, reals) {
                Ok(ints) => return Ok(ints),
                Err(EngineError::Solver { phase, path, message, .. }) => {
                    last_err = Some(EngineError::Solver { phase, path, attempts: attempt, message });
                }
                Err(other) => return Err(other),
            }
        }
        Err(last_err.unwrap_or_else(|| EngineError::solver("estimation.stage_b", "/", self.max_solver_attempts, "solver retries exhausted")))
    }
}

//! Measurement: writes `v_noisy` for every node by adding independently
//! sampled noise to `v_true`, using the mechanism and per-level privacy
//! budget from the run configuration.

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use sha2::{Digest, Sha256};

use dpnoise::{DiscreteGaussian, DiscreteLaplace, DiscreteNoise};

use crate::cancel::CancellationFlag;
use crate::config::{Config, Mechanism};
use crate::error::EngineError;
use crate::tree::{GeographicTree, NodeId};

/// Applies noise to every node not yet measured. Used both for a fresh run
/// (every node) and for resume (only the newly extended levels, via
/// `resume_measurement_phase`).
///
/// Nodes within a level are visited one at a time so the cancellation flag
/// can be checked between them; a node's own components are independent
/// draws, so that's where the parallel work happens.
pub fn measure_levels(
    tree: &mut GeographicTree,
    config: &Config,
    seed: &[u8; 32],
    levels: impl IntoIterator<Item = usize>,
    cancel: &CancellationFlag,
) -> Result<(), EngineError> {
    let mechanism = config
        .mechanism
        .ok_or_else(|| EngineError::parameter("measurement", "/", "no mechanism registered"))?;
    let root_exempt = config.has_fixed_root();
    let by_level = tree.nodes_by_level();

    for level in levels {
        if cancel.is_set() {
            return Err(EngineError::interrupted("measurement", format!("level={level}")));
        }

        if level == 0 && root_exempt {
            let v = tree.root().v_true.clone();
            tree.node_mut(GeographicTree::ROOT).v_noisy = Some(v);
            continue;
        }

        let param = *config.privacy_parameters.get(&level).ok_or_else(|| {
            EngineError::parameter("measurement", format!("level={level}"), "level has no privacy parameter")
        })?;
        let Some(ids) = by_level.get(&level) else { continue };

        for &id in ids {
            if cancel.is_set() {
                return Err(EngineError::interrupted("measurement", format!("node={id}")));
            }

            let v_true = tree.node(id).v_true.clone();
            let v_noisy: Vec<i64> = v_true
                .par_iter()
                .enumerate()
                .map(|(component, &count)| -> Result<i64, EngineError> {
                    let mut rng = component_rng(seed, id, component);
                    sample_eta(mechanism, param, &mut rng).map(|eta| count + eta)
                })
                .collect::<Result<Vec<i64>, EngineError>>()?;
            tree.node_mut(id).v_noisy = Some(v_noisy);
        }
    }

    Ok(())
}

/// Measures every level of a freshly built tree, `0..=tree.depth()`.
pub fn run(tree: &mut GeographicTree, config: &Config, seed: &[u8; 32], cancel: &CancellationFlag) -> Result<(), EngineError> {
    measure_levels(tree, config, seed, 0..=tree.depth(), cancel)
}

fn sample_eta(mechanism: Mechanism, param: f64, rng: &mut ChaCha20Rng) -> Result<i64, EngineError> {
    // An infinite privacy parameter is the zero-noise limit (scale/variance
    // -> 0); the samplers reject a literal zero or infinite argument, so
    // this is handled directly rather than routed through them.
    if param.is_infinite() {
        return Ok(0);
    }
    let sample = match mechanism {
        Mechanism::DiscreteLaplace => DiscreteLaplace { scale: 1.0 / param }.sample(rng),
        Mechanism::DiscreteGaussian => DiscreteGaussian { variance: 1.0 / (2.0 * param) }.sample(rng),
    };
    sample.map_err(|e| EngineError::parameter("measurement", "/", e.to_string()))
}

/// Derives a per-component RNG stream from the run's master seed so that
/// noise sampling is reproducible regardless of the order (or parallelism)
/// in which nodes and components are visited.
fn component_rng(seed: &[u8; 32], node_id: NodeId, component: usize) -> ChaCha20Rng {
    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update(node_id.to_le_bytes());
    hasher.update(component.to_le_bytes());
    let digest = hasher.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&digest);
    ChaCha20Rng::from_seed(arr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::PermutationBasis;
    use crate::config::ConstraintRow;
    use crate::tree::RawRecord;
    use std::collections::BTreeMap;

    fn basis() -> PermutationBasis {
        PermutationBasis::new(vec![("s".into(), vec!["0".into(), "1".into()])]).unwrap()
    }

    fn config(mechanism: Mechanism, fixed_root: bool) -> Config {
        let mut privacy_parameters = BTreeMap::from([(1, 4.0)]);
        let mut root_constraints = Vec::new();
        if fixed_root {
            root_constraints.push(ConstraintRow::total_equals(2, 100.0));
        } else {
            privacy_parameters.insert(0, 4.0);
        }
        Config {
            geo_columns: vec!["region".into()],
            process_until: 1,
            queries: vec!["s".into()],
            privacy_parameters,
            mechanism: Some(mechanism),
            root_constraints,
            geo_constraints: BTreeMap::new(),
            ..Default::default()
        }
    }

    fn sample_tree(b: &PermutationBasis) -> GeographicTree {
        let records = vec![
            RawRecord { geo: vec!["R1".into()], query: vec!["0".into()] },
            RawRecord { geo: vec!["R1".into()], query: vec!["1".into()] },
        ];
        GeographicTree::build(&records, &["region".into()], &["s".into()], b, 1).unwrap()
    }

    #[test]
    fn root_is_noise_exempt_with_fixed_total_constraint() {
        let b = basis();
        let mut tree = sample_tree(&b);
        let cfg = config(Mechanism::DiscreteLaplace, true);
        run(&mut tree, &cfg, &[0u8; 32], &CancellationFlag::new()).unwrap();
        assert_eq!(tree.root().v_noisy, Some(tree.root().v_true.clone()));
    }

    #[test]
    fn root_gets_noise_without_fixed_total_constraint() {
        let b = basis();
        let mut tree = sample_tree(&b);
        let cfg = config(Mechanism::DiscreteGaussian, false);
        run(&mut tree, &cfg, &[1u8; 32], &CancellationFlag::new()).unwrap();
        assert!(tree.root().v_noisy.is_some());
    }

    #[test]
    fn missing_level_parameter_is_parameter_error() {
        let b = basis();
        let mut tree = sample_tree(&b);
        let mut cfg = config(Mechanism::DiscreteLaplace, true);
        cfg.privacy_parameters.remove(&1);
        let err = run(&mut tree, &cfg, &[2u8; 32], &CancellationFlag::new());
        assert!(matches!(err, Err(EngineError::Parameter { .. })));
    }

    #[test]
    fn same_seed_is_reproducible() {
        let b = basis();
        let cfg = config(Mechanism::DiscreteGaussian, false);
        let mut t1 = sample_tree(&b);
        let mut t2 = sample_tree(&b);
        run(&mut t1, &cfg, &[9u8; 32], &CancellationFlag::new()).unwrap();
        run(&mut t2, &cfg, &[9u8; 32], &CancellationFlag::new()).unwrap();
        for id in 0..t1.len() {
            assert_eq!(t1.node(id).v_noisy, t2.node(id).v_noisy);
        }
    }

    #[test]
    fn cancelled_before_any_level_returns_interrupted() {
        let b = basis();
        let mut tree = sample_tree(&b);
        let cfg = config(Mechanism::DiscreteLaplace, true);
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let err = run(&mut tree, &cfg, &[3u8; 32], &cancel);
        assert!(matches!(err, Err(EngineError::Interrupted { .. })));
    }

    #[test]
    fn decreasing_rho_increases_expected_noise_magnitude() {
        let b = basis();
        let tight = {
            let mut cfg = config(Mechanism::DiscreteGaussian, false);
            cfg.privacy_parameters.insert(0, 0.01);
            cfg.privacy_parameters.insert(1, 0.01);
            cfg
        };
        let loose = {
            let mut cfg = config(Mechanism::DiscreteGaussian, false);
            cfg.privacy_parameters.insert(0, 50.0);
            cfg.privacy_parameters.insert(1, 50.0);
            cfg
        };

        let l1_distance = |tree: &GeographicTree| -> i64 {
            (0..tree.len())
                .map(|id| {
                    let node = tree.node(id);
                    let noisy = node.v_noisy.as_ref().unwrap();
                    node.v_true.iter().zip(noisy.iter()).map(|(&t, &n)| (t - n).abs()).sum::<i64>()
                })
                .sum()
        };

        let trials = 64;
        let mut tight_total = 0i64;
        let mut loose_total = 0i64;
        for trial in 0..trials {
            let seed = [trial as u8; 32];
            let mut t1 = sample_tree(&b);
            let mut t2 = sample_tree(&b);
            run(&mut t1, &tight, &seed, &CancellationFlag::new()).unwrap();
            run(&mut t2, &loose, &seed, &CancellationFlag::new()).unwrap();
            tight_total += l1_distance(&t1);
            loose_total += l1_distance(&t2);
        }

        assert!(
            tight_total > loose_total,
            "low rho (tight privacy) should add more noise than high rho on average: tight={tight_total} loose={loose_total}"
        );
    }

    #[test]
    fn infinite_rho_limit_leaves_v_noisy_exactly_v_true() {
        let b = basis();
        let mut tree = sample_tree(&b);
        let mut cfg = config(Mechanism::DiscreteGaussian, false);
        cfg.privacy_parameters.insert(0, f64::INFINITY);
        cfg.privacy_parameters.insert(1, f64::INFINITY);
        run(&mut tree, &cfg, &[7u8; 32], &CancellationFlag::new()).unwrap();
        for id in 0..tree.len() {
            let node = tree.node(id);
            assert_eq!(node.v_noisy.as_ref().unwrap(), &node.v_true);
        }
    }
}

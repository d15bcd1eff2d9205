//! Microdata Constructor (§4.7): materializes synthetic individual records
//! from estimated leaf vectors, in a deterministic row order (leaves in
//! tree order, then basis components in basis order).

use crate::basis::PermutationBasis;
use crate::error::EngineError;
use crate::tree::GeographicTree;

/// One synthetic individual: geographic path values followed by the
/// query-attribute tuple that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticRecord {
    pub geo: Vec<String>,
    pub query: Vec<String>,
}

/// Expands every leaf's `v_est` into `v_est[i]` copies of the record at
/// basis row `i`, for every leaf and every row. Fails with `StateError` if
/// a leaf has no `v_est` yet (Estimation has not reached it).
pub fn build(tree: &GeographicTree, basis: &PermutationBasis) -> Result<Vec<SyntheticRecord>, EngineError> {
    let mut records = Vec::new();
    for leaf in tree.leaves() {
        let node = tree.node(leaf);
        let v_est = node
            .v_est
            .as_ref()
            .ok_or_else(|| EngineError::state("microdata", format!("leaf at path {:?} has no v_est", node.path)))?;

        for (i, &count) in v_est.iter().enumerate() {
            if count < 0 {
                return Err(EngineError::state(
                    "microdata",
                    format!("leaf at path {:?} has a negative estimated count at basis row {i}", node.path),
                ));
            }
            let values = basis.values_of(i).ok_or_else(|| {
                EngineError::state("microdata", format!("basis row {i} out of range for this run's basis"))
            })?;
            let query: Vec<String> = values.into_iter().map(str::to_string).collect();
            for _ in 0..count {
                records.push(SyntheticRecord { geo: node.path.clone(), query: query.clone() });
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::RawRecord;

    fn basis() -> PermutationBasis {
        PermutationBasis::new(vec![("sex".into(), vec!["M".into(), "F".into()])]).unwrap()
    }

    fn tree_with_estimates(b: &PermutationBasis) -> GeographicTree {
        let records = vec![
            RawRecord { geo: vec!["R1".into()], query: vec!["M".into()] },
            RawRecord { geo: vec!["R2".into()], query: vec!["F".into()] },
        ];
        let mut tree = GeographicTree::build(&records, &["region".into()], &["sex".into()], b, 1).unwrap();
        for &id in &tree.leaves() {
            let v = tree.node(id).v_true.clone();
            tree.node_mut(id).v_est = Some(v);
        }
        tree
    }

    #[test]
    fn row_count_matches_total_estimated_population() {
        let b = basis();
        let tree = tree_with_estimates(&b);
        let records = build(&tree, &b).unwrap();
        let total: i64 = tree.leaves().iter().map(|&id| tree.node(id).v_est.as_ref().unwrap().iter().sum::<i64>()).sum();
        assert_eq!(records.len() as i64, total);
    }

    #[test]
    fn row_order_is_leaves_then_basis_order() {
        let b = basis();
        let tree = tree_with_estimates(&b);
        let records = build(&tree, &b).unwrap();
        let leaf_paths: Vec<_> = tree.leaves().iter().map(|&id| tree.node(id).path.clone()).collect();
        assert_eq!(leaf_paths, vec![vec!["R1".to_string()], vec!["R2".to_string()]]);
        assert_eq!(records[0].geo, vec!["R1".to_string()]);
        assert_eq!(records[0].query, vec!["M".to_string()]);
        assert_eq!(records.last().unwrap().geo, vec!["R2".to_string()]);
    }

    #[test]
    fn missing_estimate_is_state_error() {
        let b = basis();
        let records = vec![RawRecord { geo: vec!["R1".into()], query: vec!["M".into()] }];
        let tree = GeographicTree::build(&records, &["region".into()], &["sex".into()], &b, 1).unwrap();
        let err = build(&tree, &b);
        assert!(matches!(err, Err(EngineError::State { .. })));
    }
}

//! The geographic tree: a rooted tree whose levels correspond to nested
//! administrative divisions, each node carrying a true/noisy/estimated
//! contingency vector over the shared permutation basis.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::basis::PermutationBasis;
use crate::error::EngineError;

pub type NodeId = usize;

/// One raw input record: a geographic-attribute tuple (root to the deepest
/// declared level) plus a query-attribute tuple.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub geo: Vec<String>,
    pub query: Vec<String>,
}

/// A node in the geographic tree. `v_true` is fixed at construction;
/// `v_noisy` is written once by Measurement; `v_est` is written once by
/// Estimation. Nodes hold child references only — no parent ever reads or
/// writes through a child back-reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoNode {
    pub node_id: NodeId,
    pub parent: Option<NodeId>,
    pub path: Vec<String>,
    pub level: usize,
    pub v_true: Vec<i64>,
    pub v_noisy: Option<Vec<i64>>,
    pub v_est: Option<Vec<i64>>,
    pub children: Vec<NodeId>,
}

impl GeoNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn last_path_component(&self) -> Option<&str> {
        self.path.last().map(String::as_str)
    }
}

/// Arena-backed tree; `nodes[0]` is always the root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeographicTree {
    nodes: Vec<GeoNode>,
    depth: usize,
    basis_len: usize,
}

impl GeographicTree {
    pub const ROOT: NodeId = 0;

    /// Builds the tree down to level `depth <= geo_attrs.len()`, grouping
    /// `records` by `(g1)`, then `g2` within each group, etc.
    pub fn build(
        records: &[RawRecord],
        geo_attrs: &[String],
        query_attrs: &[String],
        basis: &PermutationBasis,
        depth: usize,
    ) -> Result<Self, EngineError> {
        if depth > geo_attrs.len() {
            return Err(EngineError::config(
                "tree.build",
                "/",
                format!("depth {depth} exceeds declared geo_columns ({})", geo_attrs.len()),
            ));
        }

        let mut tree = GeographicTree {
            nodes: vec![GeoNode {
                node_id: Self::ROOT,
                parent: None,
                path: Vec::new(),
                level: 0,
                v_true: vec![0; basis.len()],
                v_noisy: None,
                v_est: None,
                children: Vec::new(),
            }],
            depth,
            basis_len: basis.len(),
        };

        for record in records {
            if record.geo.len() < depth {
                return Err(EngineError::input(
                    "tree.build",
                    "/",
                    format!("record has {} geographic values, need at least {depth}", record.geo.len()),
                ));
            }
            if record.query.len() != query_attrs.len() {
                return Err(EngineError::input(
                    "tree.build",
                    "/",
                    format!(
                        "record has {} query values, expected {}",
                        record.query.len(),
                        query_attrs.len()
                    ),
                ));
            }

            let mut tuple = Vec::with_capacity(query_attrs.len());
            for (attr, value) in record.query.iter().enumerate() {
                let idx = basis.value_index(attr, value).ok_or_else(|| {
                    EngineError::input(
                        "tree.build",
                        "/",
                        format!("unknown value '{value}' for query attribute '{}'", query_attrs[attr]),
                    )
                })?;
                tuple.push(idx);
            }
            let component = basis.index_of(&tuple).ok_or_else(|| {
                EngineError::input("tree.build", "/", "query tuple out of basis range")
            })?;

            // Walk root -> ... -> depth, creating nodes on first sight and
            // crediting this record's component to every node it passes
            // through (which is exactly what keeps parent-sum consistent).
            let mut current = Self::ROOT;
            tree.nodes[current].v_true[component] += 1;
            for level in 0..depth {
                let value = &record.geo[level];
                current = tree.child_or_insert(current, level + 1, value)?;
                tree.nodes[current].v_true[component] += 1;
            }
        }

        tree.sort_children_recursively();
        Ok(tree)
    }

    /// Grows children below the existing leaves (nodes at the old
    /// `process_until` depth) using the original raw records, down to
    /// `new_depth`. Nodes at or above the old depth are left untouched —
    /// their `v_true`/`v_noisy`/`v_est` remain bit-identical.
    pub fn extend(
        &mut self,
        records: &[RawRecord],
        query_attrs: &[String],
        basis: &PermutationBasis,
        new_depth: usize,
    ) -> Result<(), EngineError> {
        if new_depth <= self.depth {
            return Err(EngineError::config(
                "tree.extend",
                "/",
                format!("new_depth {new_depth} must exceed current depth {}", self.depth),
            ));
        }
        let old_depth = self.depth;

        for record in records {
            if record.geo.len() < new_depth {
                return Err(EngineError::input(
                    "tree.extend",
                    "/",
                    format!("record has {} geographic values, need at least {new_depth}", record.geo.len()),
                ));
            }
            if record.query.len() != query_attrs.len() {
                return Err(EngineError::input("tree.extend", "/", "query arity mismatch"));
            }

            let mut tuple = Vec::with_capacity(query_attrs.len());
            for (attr, value) in record.query.iter().enumerate() {
                let idx = basis
                    .value_index(attr, value)
                    .ok_or_else(|| EngineError::input("tree.extend", "/", format!("unknown value '{value}'")))?;
                tuple.push(idx);
            }
            let component = basis
                .index_of(&tuple)
                .ok_or_else(|| EngineError::input("tree.extend", "/", "query tuple out of basis range"))?;

            // Locate this record's existing node at `old_depth` without
            // mutating anything above it, then extend below.
            let mut current = Self::ROOT;
            for level in 0..old_depth {
                current = self.find_child(current, &record.geo[level]).unwrap_or_else(|| {
                    unreachable!("extend() called with a record whose prefix was absent from the tree built earlier")
                });
            }
            for level in old_depth..new_depth {
                let value = &record.geo[level];
                current = self.child_or_insert(current, level + 1, value)?;
                self.nodes[current].v_true[component] += 1;
            }
        }

        self.depth = new_depth;
        self.sort_children_recursively();
        Ok(())
    }

    fn find_child(&self, parent: NodeId, value: &str) -> Option<NodeId> {
        self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].last_path_component() == Some(value))
    }

    fn child_or_insert(&mut self, parent: NodeId, level: usize, value: &str) -> Result<NodeId, EngineError> {
        if let Some(id) = self.find_child(parent, value) {
            return Ok(id);
        }
        let id = self.nodes.len();
        let mut path = self.nodes[parent].path.clone();
        path.push(value.to_string());
        self.nodes.push(GeoNode {
            node_id: id,
            parent: Some(parent),
            path,
            level,
            v_true: vec![0; self.basis_len],
            v_noisy: None,
            v_est: None,
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        Ok(id)
    }

    fn sort_children_recursively(&mut self) {
        for id in 0..self.nodes.len() {
            self.nodes[id]
                .children
                .sort_by(|&a, &b| self.nodes[a].last_path_component().cmp(&self.nodes[b].last_path_component()));
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn node(&self, id: NodeId) -> &GeoNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut GeoNode {
        &mut self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> &GeoNode {
        &self.nodes[Self::ROOT]
    }

    /// Root-first breadth-first order; deterministic because children are
    /// kept sorted by their final path component.
    pub fn traverse_bfs(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(Self::ROOT);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for &child in &self.nodes[id].children {
                queue.push_back(child);
            }
        }
        order
    }

    /// Nodes at `depth()`, lexicographically ordered by path.
    pub fn leaves(&self) -> Vec<NodeId> {
        let mut leaves: Vec<NodeId> =
            self.nodes.iter().filter(|n| n.level == self.depth).map(|n| n.node_id).collect();
        leaves.sort_by(|&a, &b| self.nodes[a].path.cmp(&self.nodes[b].path));
        leaves
    }

    pub fn children_of(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    /// level -> node ids at that level, used by Measurement to apply
    /// per-level parameters.
    pub fn nodes_by_level(&self) -> BTreeMap<usize, Vec<NodeId>> {
        let mut by_level: BTreeMap<usize, Vec<NodeId>> = BTreeMap::new();
        for node in &self.nodes {
            by_level.entry(node.level).or_default().push(node.node_id);
        }
        by_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::PermutationBasis;

    fn basis() -> PermutationBasis {
        PermutationBasis::new(vec![("sex".into(), vec!["M".into(), "F".into()])]).unwrap()
    }

    fn records() -> Vec<RawRecord> {
        vec![
            RawRecord { geo: vec!["R1".into(), "C1".into()], query: vec!["M".into()] },
            RawRecord { geo: vec!["R1".into(), "C1".into()], query: vec!["F".into()] },
            RawRecord { geo: vec!["R1".into(), "C2".into()], query: vec!["M".into()] },
            RawRecord { geo: vec!["R2".into(), "C3".into()], query: vec!["F".into()] },
        ]
    }

    #[test]
    fn parent_sums_match_children_at_every_level() {
        let b = basis();
        let recs = records();
        let tree = GeographicTree::build(&recs, &["region".into(), "county".into()], &["sex".into()], &b, 2).unwrap();

        for id in 0..tree.len() {
            let node = tree.node(id);
            if node.is_leaf() {
                continue;
            }
            let mut sum = vec![0i64; b.len()];
            for &c in &node.children {
                for i in 0..b.len() {
                    sum[i] += tree.node(c).v_true[i];
                }
            }
            assert_eq!(sum, node.v_true);
        }
    }

    #[test]
    fn leaves_are_lexicographic_by_path() {
        let b = basis();
        let recs = records();
        let tree = GeographicTree::build(&recs, &["region".into(), "county".into()], &["sex".into()], &b, 2).unwrap();
        let leaf_paths: Vec<_> = tree.leaves().into_iter().map(|id| tree.node(id).path.clone()).collect();
        let mut sorted = leaf_paths.clone();
        sorted.sort();
        assert_eq!(leaf_paths, sorted);
    }

    #[test]
    fn extend_preserves_upper_levels_bit_identical() {
        let b = basis();
        let recs = records();
        let mut tree = GeographicTree::build(&recs, &["region".into(), "county".into(), "zone".into()], &["sex".into()], &b, 1).unwrap();
        let before_root = tree.root().v_true.clone();
        let level1_before: Vec<_> = tree.nodes_by_level()[&1].iter().map(|&id| tree.node(id).v_true.clone()).collect();

        tree.extend(&recs, &["sex".into()], &b, 2).unwrap();

        assert_eq!(tree.root().v_true, before_root);
        let level1_after: Vec<_> = tree.nodes_by_level()[&1].iter().map(|&id| tree.node(id).v_true.clone()).collect();
        assert_eq!(level1_before, level1_after);
    }

    #[test]
    fn missing_geo_value_is_input_error() {
        let b = basis();
        let bad = vec![RawRecord { geo: vec!["R1".into()], query: vec!["M".into()] }];
        let err = GeographicTree::build(&bad, &["region".into(), "county".into()], &["sex".into()], &b, 2);
        assert!(matches!(err, Err(EngineError::Input { .. })));
    }
}

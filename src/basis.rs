//! The permutation basis: the canonical, lexicographically ordered
//! Cartesian product of the query attributes' value domains, shared by
//! every contingency vector in a run.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::tree::RawRecord;

/// Canonical index over `D(q_1) x ... x D(q_k)`, ordered lexicographically
/// (the first attribute varies slowest). Computed once per run and shared
/// by reference; `index_of` and `tuple_of` are mutual inverses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermutationBasis {
    attribute_names: Vec<String>,
    domains: Vec<Vec<String>>,
    value_lookup: Vec<HashMap<String, usize>>,
    /// `strides[i]` is the number of basis rows spanned by one increment of
    /// attribute `i`; `strides[k-1] == 1`.
    strides: Vec<usize>,
    len: usize,
}

impl PermutationBasis {
    /// `attributes` is the ordered list of `(name, domain)` pairs; `domain`
    /// fixes the order in which that attribute's values are enumerated.
    pub fn new(attributes: Vec<(String, Vec<String>)>) -> Result<Self, EngineError> {
        if attributes.is_empty() {
            return Err(EngineError::config("basis", "/", "at least one query attribute is required"));
        }
        for (name, domain) in &attributes {
            if domain.is_empty() {
                return Err(EngineError::config(
                    "basis",
                    "/",
                    format!("query attribute '{name}' has an empty value domain"),
                ));
            }
        }

        let (attribute_names, domains): (Vec<_>, Vec<_>) = attributes.into_iter().unzip();

        let mut strides = vec![1usize; domains.len()];
        for i in (0..domains.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * domains[i + 1].len();
        }
        let len = strides[0] * domains[0].len();

        let value_lookup = domains
            .iter()
            .map(|d| d.iter().enumerate().map(|(i, v)| (v.clone(), i)).collect())
            .collect();

        Ok(Self { attribute_names, domains, value_lookup, strides, len })
    }

    /// `|P|`, the total number of rows in the basis.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Per-attribute domain sizes, in declared order.
    pub fn arity(&self) -> Vec<usize> {
        self.domains.iter().map(Vec::len).collect()
    }

    pub fn attribute_names(&self) -> &[String] {
        &self.attribute_names
    }

    pub fn domain(&self, attr: usize) -> Option<&[String]> {
        self.domains.get(attr).map(Vec::as_slice)
    }

    /// Maps a raw string value for attribute `attr` to its domain index.
    pub fn value_index(&self, attr: usize, value: &str) -> Option<usize> {
        self.value_lookup.get(attr)?.get(value).copied()
    }

    /// Row index for a per-attribute tuple of domain indices.
    pub fn index_of(&self, tuple: &[usize]) -> Option<usize> {
        if tuple.len() != self.domains.len() {
            return None;
        }
        let mut idx = 0usize;
        for (i, &v) in tuple.iter().enumerate() {
            if v >= self.domains[i].len() {
                return None;
            }
            idx += v * self.strides[i];
        }
        Some(idx)
    }

    /// Inverse of `index_of`.
    pub fn tuple_of(&self, mut index: usize) -> Option<Vec<usize>> {
        if index >= self.len {
            return None;
        }
        let mut tuple = Vec::with_capacity(self.domains.len());
        for i in 0..self.domains.len() {
            let v = index / self.strides[i];
            tuple.push(v);
            index -= v * self.strides[i];
        }
        Some(tuple)
    }

    /// The raw string values for basis row `index`, one per query attribute.
    pub fn values_of(&self, index: usize) -> Option<Vec<&str>> {
        let tuple = self.tuple_of(index)?;
        Some(tuple.iter().enumerate().map(|(i, &v)| self.domains[i][v].as_str()).collect())
    }

    /// Builds the basis from the input itself: each query attribute's domain
    /// is the sorted set of distinct values observed for it in `records`.
    /// Declared query attributes carry no domain of their own, so this is
    /// where that domain is actually decided.
    pub fn from_records(records: &[RawRecord], query_attrs: &[String]) -> Result<Self, EngineError> {
        let mut domains: Vec<BTreeSet<String>> = vec![BTreeSet::new(); query_attrs.len()];
        for record in records {
            if record.query.len() != query_attrs.len() {
                return Err(EngineError::input(
                    "basis.from_records",
                    "/",
                    format!("record has {} query values, expected {}", record.query.len(), query_attrs.len()),
                ));
            }
            for (i, value) in record.query.iter().enumerate() {
                domains[i].insert(value.clone());
            }
        }
        let attributes: Vec<(String, Vec<String>)> = query_attrs
            .iter()
            .cloned()
            .zip(domains.into_iter().map(|d| d.into_iter().collect()))
            .collect();
        Self::new(attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basis() -> PermutationBasis {
        PermutationBasis::new(vec![
            ("sex".into(), vec!["M".into(), "F".into()]),
            ("age".into(), vec!["0-17".into(), "18-64".into(), "65+".into()]),
        ])
        .unwrap()
    }

    #[test]
    fn len_is_product_of_domain_sizes() {
        assert_eq!(basis().len(), 6);
    }

    #[test]
    fn index_and_tuple_are_inverse() {
        let b = basis();
        for i in 0..b.len() {
            let t = b.tuple_of(i).unwrap();
            assert_eq!(b.index_of(&t), Some(i));
        }
    }

    #[test]
    fn lexicographic_order_first_attribute_varies_slowest() {
        let b = basis();
        assert_eq!(b.tuple_of(0).unwrap(), vec![0, 0]);
        assert_eq!(b.tuple_of(1).unwrap(), vec![0, 1]);
        assert_eq!(b.tuple_of(3).unwrap(), vec![1, 0]);
    }

    #[test]
    fn rejects_empty_domain() {
        let err = PermutationBasis::new(vec![("sex".into(), vec![])]);
        assert!(err.is_err());
    }

    #[test]
    fn from_records_infers_sorted_distinct_domains() {
        let records = vec![
            RawRecord { geo: vec!["R1".into()], query: vec!["F".into(), "18-64".into()] },
            RawRecord { geo: vec!["R1".into()], query: vec!["M".into(), "0-17".into()] },
            RawRecord { geo: vec!["R2".into()], query: vec!["F".into(), "0-17".into()] },
        ];
        let b = PermutationBasis::from_records(&records, &["sex".into(), "age".into()]).unwrap();
        assert_eq!(b.domain(0), Some(&["F".to_string(), "M".to_string()][..]));
        assert_eq!(b.domain(1), Some(&["0-17".to_string(), "18-64".to_string()][..]));
        assert_eq!(b.len(), 4);
    }

    #[test]
    fn from_records_rejects_query_arity_mismatch() {
        let records = vec![RawRecord { geo: vec!["R1".into()], query: vec!["F".into()] }];
        let err = PermutationBasis::from_records(&records, &["sex".into(), "age".into()]);
        assert!(matches!(err, Err(EngineError::Input { .. })));
    }
}

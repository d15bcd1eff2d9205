use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Noise mechanism selected for every level of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mechanism {
    DiscreteGaussian,
    DiscreteLaplace,
}

/// Distance metric used only by the quality-validation collaborator
/// (outside this engine's scope); carried here because it is part of the
/// declared configuration surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    Manhattan,
    Euclidean,
    Cosine,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sense {
    Eq,
    Le,
    Ge,
}

/// One row of a linear constraint over the permutation basis:
/// `coefficients . x <sense> rhs`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConstraintRow {
    pub coefficients: Vec<f64>,
    pub sense: Sense,
    pub rhs: f64,
}

impl ConstraintRow {
    /// A "total population = rhs" row: every coefficient is 1.
    pub fn total_equals(len: usize, rhs: f64) -> Self {
        Self { coefficients: vec![1.0; len], sense: Sense::Eq, rhs }
    }

    fn is_total_equality(&self) -> bool {
        self.sense == Sense::Eq && self.coefficients.iter().all(|&c| c == 1.0)
    }
}

/// Run configuration, built by the CLI from a TOML file plus flag
/// overrides. Already-validated configuration is what the engine itself
/// consumes; the engine never parses argv or TOML.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub geo_columns: Vec<String>,
    pub process_until: usize,
    pub queries: Vec<String>,
    /// level -> privacy budget rho_level.
    pub privacy_parameters: BTreeMap<usize, f64>,
    pub mechanism: Option<Mechanism>,
    pub root_constraints: Vec<ConstraintRow>,
    /// level -> user-declared constraint rows for that level.
    pub geo_constraints: BTreeMap<usize, Vec<ConstraintRow>>,
    #[serde(default)]
    pub distance_metric: DistanceMetric,
    pub data_path: PathBuf,
    pub output_path: PathBuf,
    pub output_file: String,
}

impl Config {
    /// True iff the root carries an explicit "total population = T" row,
    /// the only condition under which Measurement exempts the root from
    /// noise (spec's Open Question, resolved explicitly: noise-exempt iff
    /// such a constraint is registered).
    pub fn has_fixed_root(&self) -> bool {
        self.root_constraints.iter().any(ConstraintRow::is_total_equality)
    }

    /// Cross-field checks the CLI runs before calling into the engine.
    /// Raises `ConfigError`; compare to `Measurement`'s own defensive
    /// `ParameterError` checks, which fire if a caller skips validation.
    pub fn validate(&self) -> Result<(), EngineError> {
        const PHASE: &str = "config";

        if self.geo_columns.is_empty() {
            return Err(EngineError::config(PHASE, "/", "geo_columns must be non-empty"));
        }
        if self.queries.is_empty() {
            return Err(EngineError::config(PHASE, "/", "queries must be non-empty"));
        }
        if self.process_until > self.geo_columns.len() {
            return Err(EngineError::config(
                PHASE,
                "/",
                format!(
                    "process_until ({}) exceeds geo_columns.len() ({})",
                    self.process_until,
                    self.geo_columns.len()
                ),
            ));
        }
        if self.mechanism.is_none() {
            return Err(EngineError::config(PHASE, "/", "no mechanism registered"));
        }

        let root_exempt = self.has_fixed_root();
        for level in 0..=self.process_until {
            if level == 0 && root_exempt {
                continue;
            }
            match self.privacy_parameters.get(&level) {
                // `rho = infinity` is the zero-noise limit (spec.md §8 scenario 2), not an error.
                Some(rho) if !rho.is_nan() && *rho > 0.0 => {}
                Some(rho) => {
                    return Err(EngineError::config(
                        PHASE,
                        format!("level={level}"),
                        format!("privacy_parameters[{level}] = {rho} is not a positive value"),
                    ));
                }
                None => {
                    return Err(EngineError::config(
                        PHASE,
                        format!("level={level}"),
                        format!("level {level} has no privacy parameter"),
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            geo_columns: vec!["state".into(), "county".into()],
            process_until: 1,
            queries: vec!["sex".into()],
            privacy_parameters: BTreeMap::from([(0, 1.0), (1, 1.0)]),
            mechanism: Some(Mechanism::DiscreteLaplace),
            ..Default::default()
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn missing_mechanism_is_config_error() {
        let mut cfg = base_config();
        cfg.mechanism = None;
        assert!(matches!(cfg.validate(), Err(EngineError::Config { .. })));
    }

    #[test]
    fn root_fixed_total_waives_level_zero_budget() {
        let mut cfg = base_config();
        cfg.privacy_parameters.remove(&0);
        cfg.root_constraints.push(ConstraintRow::total_equals(2, 100.0));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn missing_level_budget_without_root_exemption_fails() {
        let mut cfg = base_config();
        cfg.privacy_parameters.remove(&0);
        assert!(matches!(cfg.validate(), Err(EngineError::Config { .. })));
    }

    #[test]
    fn infinite_rho_is_a_valid_zero_noise_budget() {
        let mut cfg = base_config();
        cfg.privacy_parameters.insert(0, f64::INFINITY);
        cfg.privacy_parameters.insert(1, f64::INFINITY);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_or_negative_rho_is_rejected() {
        let mut cfg = base_config();
        cfg.privacy_parameters.insert(1, 0.0);
        assert!(matches!(cfg.validate(), Err(EngineError::Config { .. })));
        cfg.privacy_parameters.insert(1, -1.0);
        assert!(matches!(cfg.validate(), Err(EngineError::Config { .. })));
    }
}

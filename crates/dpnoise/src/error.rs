use thiserror::Error;

/// Raised when a sampler is asked to draw from a malformed distribution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParameterError {
    #[error("scale must be positive and finite, got {0}")]
    NonPositiveScale(String),
    #[error("variance must be positive and finite, got {0}")]
    NonPositiveVariance(String),
}

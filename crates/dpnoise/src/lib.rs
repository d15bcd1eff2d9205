#![doc = "Exact discrete-noise sampling kernels for differential privacy"]
//!
//! Factored out as its own crate with no dependency on the rest of the
//! TopDown engine: just arbitrary-precision rational arithmetic over a
//! caller-supplied cryptographic RNG.

mod bernoulli;
mod error;
mod gaussian;
mod laplace;

pub use error::ParameterError;
pub use gaussian::sample_discrete_gaussian;
pub use laplace::sample_discrete_laplace;

use rand::{CryptoRng, RngCore};

/// A per-level noise mechanism, sampled independently for each component of
/// a node's contingency vector.
pub trait DiscreteNoise {
    /// Draw one sample from this mechanism.
    fn sample<R: RngCore + CryptoRng + ?Sized>(&self, rng: &mut R) -> Result<i64, ParameterError>;
}

/// `Delta = 1` discrete Laplace mechanism: `scale = sensitivity / epsilon`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscreteLaplace {
    pub scale: f64,
}

impl DiscreteNoise for DiscreteLaplace {
    fn sample<R: RngCore + CryptoRng + ?Sized>(&self, rng: &mut R) -> Result<i64, ParameterError> {
        sample_discrete_laplace(rng, self.scale)
    }
}

/// `Delta = 1` discrete Gaussian mechanism: `variance = sensitivity^2 / (2 * rho)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscreteGaussian {
    pub variance: f64,
}

impl DiscreteNoise for DiscreteGaussian {
    fn sample<R: RngCore + CryptoRng + ?Sized>(&self, rng: &mut R) -> Result<i64, ParameterError> {
        sample_discrete_gaussian(rng, self.variance)
    }
}

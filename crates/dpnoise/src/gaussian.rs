use num_bigint::BigInt;
use num_rational::Ratio;
use num_traits::Signed;
use rand::RngCore;

use crate::bernoulli::bernoulli_exp;
use crate::error::ParameterError;
use crate::laplace::sample_discrete_laplace_exact;

/// Draws an exact sample from the discrete Gaussian distribution with
/// variance `sigma2 > 0`: probability mass proportional to
/// `exp(-k^2 / (2 sigma2))` on `k in Z`.
///
/// Proposes from a discrete Laplace with integer scale `t = floor(sigma)+1`
/// and accepts with probability `exp(-(|Y|t - sigma2)^2 / (2 sigma2 t^2))`,
/// iterating until acceptance, per Algorithm 3 of Canonne, Kamath & Steinke
/// (2020). `sigma2` is converted to an exact rational once; every
/// acceptance test afterwards is an exact comparison between rationals
/// built from arbitrary-precision integers.
pub fn sample_discrete_gaussian<R: RngCore + ?Sized>(rng: &mut R, variance: f64) -> Result<i64, ParameterError> {
    if !(variance.is_finite() && variance > 0.0) {
        return Err(ParameterError::NonPositiveVariance(variance.to_string()));
    }
    let sigma2 = Ratio::<BigInt>::approximate_float(variance)
        .unwrap_or_else(|| Ratio::new(BigInt::from(1), BigInt::from(1)));
    let t_int = variance.sqrt().floor() as i64 + 1;
    let t = BigInt::from(t_int);
    let two_sigma2_t2 = Ratio::from_integer(BigInt::from(2)) * &sigma2 * Ratio::from_integer(&t * &t);

    loop {
        let y = sample_discrete_laplace_exact(rng, t_int)?;
        let diff = Ratio::from_integer(BigInt::from(y).abs() * &t) - &sigma2;
        let z = (&diff * &diff) / &two_sigma2_t2;
        debug_assert!(!z.is_negative());
        if bernoulli_exp(rng, &z) {
            return Ok(y);
        }
    }
}

use num_bigint::{BigInt, BigUint};
use num_rational::Ratio;
use num_traits::{One, Zero};
use rand::RngCore;

use crate::bernoulli::{bernoulli, bernoulli_exp, uniform_below};
use crate::error::ParameterError;

/// Draws an exact sample from the discrete Laplace distribution with scale
/// `t > 0`: probability mass proportional to `exp(-|k|/t)` on `k in Z`.
///
/// `t` is converted to an exact rational before any arithmetic happens, so
/// the acceptance tests below never compare floating-point approximations
/// of `exp`. Implements Algorithm 2 of Canonne, Kamath & Steinke, "The
/// Discrete Gaussian for Differential Privacy" (2020).
pub fn sample_discrete_laplace<R: RngCore + ?Sized>(rng: &mut R, t: f64) -> Result<i64, ParameterError> {
    if !(t.is_finite() && t > 0.0) {
        return Err(ParameterError::NonPositiveScale(t.to_string()));
    }
    let scale = Ratio::<BigInt>::approximate_float(t)
        .unwrap_or_else(|| Ratio::new(BigInt::from(1), BigInt::from(1)));
    Ok(sample_with_scale(rng, &scale))
}

/// Same distribution, but for a scale that is already an exact positive
/// integer (used by the discrete Gaussian's proposal step, so its integer
/// scale `t = floor(sigma)+1` never passes through a float conversion).
pub(crate) fn sample_discrete_laplace_exact<R: RngCore + ?Sized>(
    rng: &mut R,
    t: i64,
) -> Result<i64, ParameterError> {
    if t <= 0 {
        return Err(ParameterError::NonPositiveScale(t.to_string()));
    }
    let scale = Ratio::from_integer(BigInt::from(t));
    Ok(sample_with_scale(rng, &scale))
}

fn sample_with_scale<R: RngCore + ?Sized>(rng: &mut R, scale: &Ratio<BigInt>) -> i64 {
    let p = scale.numer().to_biguint().expect("scale > 0");
    let q = scale.denom().to_biguint().expect("scale > 0");

    loop {
        // U ~ Uniform{0, ..., q-1}; D ~ Bernoulli(exp(-U/t))
        let u = uniform_below(rng, &q);
        let x = Ratio::new(BigInt::from(u.clone()) * BigInt::from(q.clone()), BigInt::from(p.clone()));
        if !bernoulli_exp(rng, &x) {
            continue;
        }

        // V: number of consecutive successes of Bernoulli(exp(-1)).
        let mut v: u64 = 0;
        let one = Ratio::<BigInt>::one();
        while bernoulli_exp(rng, &one) {
            v += 1;
        }

        let big_q = BigInt::from(q.clone());
        let big_p = BigInt::from(p.clone());
        let x_val = BigInt::from(u) + &big_q * BigInt::from(v);
        let y = &x_val / &big_p; // floor division, x_val and p both non-negative

        // Unbiased sign bit; reject the spurious negative-zero outcome.
        let negative = bernoulli(rng, &BigUint::from(1u8), &BigUint::from(2u8));
        if negative && y.is_zero() {
            continue;
        }
        let signed = if negative { -y } else { y };
        return i64_from_bigint(&signed);
    }
}

fn i64_from_bigint(v: &BigInt) -> i64 {
    use num_traits::ToPrimitive;
    v.to_i64().unwrap_or(if v.is_negative() { i64::MIN } else { i64::MAX })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn rejects_non_positive_scale() {
        let mut rng = ChaCha20Rng::seed_from_u64(0);
        assert!(sample_discrete_laplace(&mut rng, 0.0).is_err());
        assert!(sample_discrete_laplace(&mut rng, -1.0).is_err());
        assert!(sample_discrete_laplace(&mut rng, f64::NAN).is_err());
    }

    #[test]
    fn empirical_mean_is_near_zero() {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let n = 20_000;
        let sum: i64 = (0..n).map(|_| sample_discrete_laplace(&mut rng, 3.0).unwrap()).sum();
        let mean = sum as f64 / n as f64;
        assert!(mean.abs() < 0.3, "mean={mean}");
    }
}

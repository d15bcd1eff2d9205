//! Exact Bernoulli sampling kernels, shared by the discrete Laplace and
//! discrete Gaussian samplers. All acceptance tests compare exact rationals
//! built from arbitrary-precision integers; nothing here ever compares a
//! floating-point approximation of `exp`.

use num_bigint::{BigInt, BigUint};
use num_rational::Ratio;
use num_traits::{One, Signed, Zero};
use rand::RngCore;

/// Draws a uniform integer in `[0, bound)` with no modulo bias, via rejection
/// sampling on the minimal number of random bits that cover `bound`.
pub(crate) fn uniform_below<R: RngCore + ?Sized>(rng: &mut R, bound: &BigUint) -> BigUint {
    debug_assert!(!bound.is_zero());
    let bits = bound.bits();
    let bytes = bits.div_ceil(8) as usize;
    let slack = (bytes as u64 * 8) - bits;
    loop {
        let mut buf = vec![0u8; bytes];
        rng.fill_bytes(&mut buf);
        if slack > 0 {
            buf[0] &= 0xFFu8 >> slack;
        }
        let candidate = BigUint::from_bytes_be(&buf);
        if candidate < *bound {
            return candidate;
        }
    }
}

/// Exact `Bernoulli(a/b)` for `0 <= a <= b`, `b > 0`.
pub(crate) fn bernoulli<R: RngCore + ?Sized>(rng: &mut R, a: &BigUint, b: &BigUint) -> bool {
    debug_assert!(a <= b);
    debug_assert!(!b.is_zero());
    uniform_below(rng, b) < *a
}

/// `Bernoulli(exp(-x))` for `0 <= x <= 1`, via the classical alternating
/// sequence of exact coin flips `Bernoulli(x/k)`, `k = 1, 2, ...`: the
/// outcome is `true` iff the first `k` at which the flip fails is odd.
fn bernoulli_exp_unit<R: RngCore + ?Sized>(rng: &mut R, x: &Ratio<BigInt>) -> bool {
    debug_assert!(!x.is_negative());
    debug_assert!(*x <= Ratio::one());
    let a = x.numer().to_biguint().expect("x >= 0");
    let b = x.denom().to_biguint().expect("denominator > 0");
    let mut k = BigUint::one();
    loop {
        let denom = &b * &k;
        if !bernoulli(rng, &a, &denom) {
            return !(&k % 2u8).is_zero();
        }
        k += 1u8;
    }
}

/// `Bernoulli(exp(-x))` for any `x >= 0`: splits off the integer part as a
/// product of independent `exp(-1)` draws, then handles the fractional
/// remainder with [`bernoulli_exp_unit`].
pub(crate) fn bernoulli_exp<R: RngCore + ?Sized>(rng: &mut R, x: &Ratio<BigInt>) -> bool {
    debug_assert!(!x.is_negative());
    let whole = x.trunc();
    let frac = x - &whole;
    let mut i = BigInt::zero();
    let one = Ratio::<BigInt>::one();
    while i < *whole.numer() {
        if !bernoulli_exp_unit(rng, &one) {
            return false;
        }
        i += 1;
    }
    bernoulli_exp_unit(rng, &frac)
}

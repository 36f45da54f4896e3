//! Clamped, vectorized wrappers over the `statrs` special functions.
//!
//! Every input is floored at [`EPSILON`] before evaluation so that callers never
//! feed a non-positive argument into `ln Γ` or `ψ`.

use ndarray::{Array, ArrayView, Dimension};
use statrs::function::{beta, gamma};

/// The floor applied to every strictly positive quantity (means, dispersions,
/// special function arguments).
pub const EPSILON: f64 = 1e-6;

/// Floors `x` at [`EPSILON`], also mapping `NaN` to the floor.
#[inline]
pub fn clamp_positive(x: f64) -> f64 {
    if x > EPSILON { x } else { EPSILON }
}

/// The natural logarithm of the gamma function.
#[inline]
pub fn ln_gamma(x: f64) -> f64 {
    gamma::ln_gamma(clamp_positive(x))
}

/// The digamma function, the derivative of `ln Γ`.
#[inline]
pub fn digamma(x: f64) -> f64 {
    gamma::digamma(clamp_positive(x))
}

/// The regularized incomplete beta function `I_x(a, b)`.
///
/// `a` and `b` are clamped to be positive and `x` to `[0, 1]`.
#[inline]
pub fn beta_reg(a: f64, b: f64, x: f64) -> f64 {
    beta::beta_reg(clamp_positive(a), clamp_positive(b), x.clamp(0., 1.))
}

/// Applies [`ln_gamma`] elementwise.
pub fn ln_gamma_arr<D: Dimension>(x: ArrayView<f64, D>) -> Array<f64, D> {
    x.mapv(ln_gamma)
}

/// Applies [`digamma`] elementwise.
pub fn digamma_arr<D: Dimension>(x: ArrayView<f64, D>) -> Array<f64, D> {
    x.mapv(digamma)
}

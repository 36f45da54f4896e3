use ndarray::{Array, ArrayView, Dimension, Zip};

use super::LossFn;
use crate::{
    MlErr, Result,
    error::check_shape,
    special::{self, clamp_positive, digamma_arr, ln_gamma_arr},
};

/// The Negative Binomial negative log-likelihood of a single observation.
///
/// `-[lnΓ(y+k) - lnΓ(k) - lnΓ(y+1) + k·ln(k/(k+μ)) + y·ln(μ/(k+μ))]`, with `μ` and `k` floored at
/// `EPSILON`.
pub fn nll(mean: f64, dispersion: f64, y: f64) -> f64 {
    let mu = clamp_positive(mean);
    let k = clamp_positive(dispersion);

    -(special::ln_gamma(y + k) - special::ln_gamma(k) - special::ln_gamma(y + 1.)
        + k * (k / (k + mu)).ln()
        + y * (mu / (k + mu)).ln())
}

/// The gradient of [`nll`] with respect to the mean and the dispersion:
///
/// * `∂/∂μ = (μ - y)·k / (μ·(k+μ))`
/// * `∂/∂k = ψ(k) - ψ(y+k) - ln(k/(k+μ)) + (y - μ)/(k+μ)`
pub fn nll_grad(mean: f64, dispersion: f64, y: f64) -> (f64, f64) {
    let mu = clamp_positive(mean);
    let k = clamp_positive(dispersion);

    let d_mean = (mu - y) * k / (mu * (k + mu));
    let d_dispersion = special::digamma(k) - special::digamma(y + k) - (k / (k + mu)).ln()
        + (y - mu) / (k + mu);

    (d_mean, d_dispersion)
}

/// The mean Negative Binomial negative log-likelihood over a batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct NegBinomialNll;

impl NegBinomialNll {
    /// Returns a new `NegBinomialNll`.
    pub fn new() -> Self {
        Self
    }

    fn check<D: Dimension>(
        mean: &ArrayView<f64, D>,
        dispersion: &ArrayView<f64, D>,
        y: &ArrayView<f64, D>,
    ) -> Result<()> {
        check_shape("dispersion", dispersion.shape(), mean.shape())?;
        check_shape("targets", y.shape(), mean.shape())?;

        if mean.is_empty() {
            return Err(MlErr::InvalidInput("the loss needs at least one element".into()));
        }

        if y.iter().any(|&y| y.is_nan() || y < 0.) {
            return Err(MlErr::InvalidInput(
                "negative binomial targets must be non negative counts".into(),
            ));
        }

        Ok(())
    }
}

impl LossFn for NegBinomialNll {
    fn loss<D: Dimension>(
        &self,
        mean: ArrayView<f64, D>,
        dispersion: ArrayView<f64, D>,
        y: ArrayView<f64, D>,
    ) -> Result<f64> {
        Self::check(&mean, &dispersion, &y)?;

        let mu = mean.mapv(clamp_positive);
        let k = dispersion.mapv(clamp_positive);
        let log_norm = ln_gamma_arr((&y + &k).view())
            - ln_gamma_arr(k.view())
            - ln_gamma_arr(y.mapv(|y| y + 1.).view());

        let total = Zip::from(&log_norm)
            .and(&mu)
            .and(&k)
            .and(&y)
            .fold(0., |acc, &c, &mu, &k, &y| {
                acc - (c + k * (k / (k + mu)).ln() + y * (mu / (k + mu)).ln())
            });

        Ok(total / mean.len() as f64)
    }

    fn loss_prime<D: Dimension>(
        &self,
        mean: ArrayView<f64, D>,
        dispersion: ArrayView<f64, D>,
        y: ArrayView<f64, D>,
    ) -> Result<(Array<f64, D>, Array<f64, D>)> {
        Self::check(&mean, &dispersion, &y)?;

        let n = mean.len() as f64;
        let mu = mean.mapv(clamp_positive);
        let k = dispersion.mapv(clamp_positive);
        let psi = digamma_arr(k.view()) - digamma_arr((&y + &k).view());

        let mut d_mean = Array::zeros(mean.raw_dim());
        let mut d_dispersion = Array::zeros(mean.raw_dim());
        Zip::from(&mut d_mean)
            .and(&mut d_dispersion)
            .and(&mu)
            .and(&k)
            .and(&y)
            .and(&psi)
            .for_each(|dm, dk, &mu, &k, &y, &psi| {
                *dm = (mu - y) * k / (mu * (k + mu)) / n;
                *dk = (psi - (k / (k + mu)).ln() + (y - mu) / (k + mu)) / n;
            });

        Ok((d_mean, d_dispersion))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::distribution::NegativeBinomial;

    fn central(f: impl Fn(f64) -> f64, x: f64) -> f64 {
        let h = 1e-5 * x.abs().max(1.);
        (f(x + h) - f(x - h)) / (2. * h)
    }

    fn close(analytic: f64, numerical: f64) -> bool {
        (analytic - numerical).abs() <= 1e-3 * numerical.abs().max(1e-3)
    }

    #[test]
    fn nll_is_the_negative_log_pmf() {
        for (mu, k, y) in [(50., 10., 42.), (0.5, 0.2, 0.), (3., 1e4, 7.)] {
            let expected = -NegativeBinomial::new(mu, k).ln_pmf(y);
            assert!((nll(mu, k, y) - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn analytic_gradients_match_central_differences() {
        let cases = [
            (50., 10., 42.),
            (50., 10., 0.),
            (2., 0.5, 9.),
            (0.3, 3., 1.),
            (120., 1000., 95.),
            (7., 0.05, 3.),
        ];

        for (mu, k, y) in cases {
            let (dm, dk) = nll_grad(mu, k, y);
            let num_dm = central(|m| nll(m, k, y), mu);
            let num_dk = central(|d| nll(mu, d, y), k);

            assert!(close(dm, num_dm), "dμ at {mu}, {k}, {y}: {dm} vs {num_dm}");
            assert!(close(dk, num_dk), "dk at {mu}, {k}, {y}: {dk} vs {num_dk}");
        }
    }

    #[test]
    fn the_mean_gradient_vanishes_at_the_observation() {
        let (dm, _) = nll_grad(12., 4., 12.);
        assert!(dm.abs() < 1e-12);
    }

    #[test]
    fn batch_loss_is_the_mean_and_gradients_are_scaled() {
        let mean = array![10., 20.];
        let dispersion = array![2., 5.];
        let y = array![8., 25.];
        let loss_fn = NegBinomialNll::new();

        let loss = loss_fn.loss(mean.view(), dispersion.view(), y.view()).unwrap();
        let expected = (nll(10., 2., 8.) + nll(20., 5., 25.)) / 2.;
        assert!((loss - expected).abs() < 1e-12);

        let (dm, dk) = loss_fn
            .loss_prime(mean.view(), dispersion.view(), y.view())
            .unwrap();
        let (gm, gk) = nll_grad(20., 5., 25.);
        assert!((dm[1] - gm / 2.).abs() < 1e-12);
        assert!((dk[1] - gk / 2.).abs() < 1e-12);
    }

    #[test]
    fn mismatched_or_invalid_targets_fail() {
        let loss_fn = NegBinomialNll::new();
        let ones = array![1., 1.];

        assert!(loss_fn.loss(ones.view(), ones.view(), array![1.].view()).is_err());
        assert!(loss_fn.loss(ones.view(), ones.view(), array![1., -1.].view()).is_err());
        assert!(loss_fn.loss(ones.view(), ones.view(), array![1., f64::NAN].view()).is_err());
    }

    #[test]
    fn degenerate_parameters_are_clamped() {
        assert!(nll(0., 0., 3.).is_finite());
        let (dm, dk) = nll_grad(-1., 0., 3.);
        assert!(dm.is_finite() && dk.is_finite());
    }
}

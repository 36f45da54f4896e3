//! The Negative Binomial count distribution, parameterized by its mean and dispersion.
//!
//! With mean `μ` and dispersion `k` the variance is `μ + μ²/k`: large dispersions converge to a
//! Poisson distribution with rate `μ` and small ones are arbitrarily overdispersed.

use rand::Rng;
use rand_distr::{Distribution, Gamma, Poisson};

use crate::{
    MlErr, Result,
    special::{self, clamp_positive},
};

/// The largest count the quantile search will consider.
const MAX_COUNT: u64 = 1 << 52;

/// A Negative Binomial distribution over the non-negative integers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NegativeBinomial {
    mean: f64,
    dispersion: f64,
}

impl NegativeBinomial {
    /// Creates a new `NegativeBinomial`.
    ///
    /// Both parameters are floored at `EPSILON` so the distribution is always well defined.
    ///
    /// # Arguments
    /// * `mean` - The expected count `μ`.
    /// * `dispersion` - The dispersion `k`, lower values mean more variance.
    ///
    /// # Returns
    /// A new `NegativeBinomial` instance.
    pub fn new(mean: f64, dispersion: f64) -> Self {
        Self {
            mean: clamp_positive(mean),
            dispersion: clamp_positive(dispersion),
        }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn dispersion(&self) -> f64 {
        self.dispersion
    }

    /// Returns `μ + μ²/k`.
    pub fn variance(&self) -> f64 {
        self.mean + self.mean.powi(2) / self.dispersion
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// The probability of a single success in the failures-before-`k`-successes view of the
    /// distribution.
    fn success_prob(&self) -> f64 {
        self.dispersion / (self.dispersion + self.mean)
    }

    /// The natural logarithm of the probability mass at `y`.
    ///
    /// `y` may be any non-negative real, negative values are floored at zero.
    pub fn ln_pmf(&self, y: f64) -> f64 {
        let Self {
            mean: mu,
            dispersion: k,
        } = *self;
        let y = y.max(0.);

        special::ln_gamma(y + k) - special::ln_gamma(k) - special::ln_gamma(y + 1.)
            + k * (k / (k + mu)).ln()
            + y * (mu / (k + mu)).ln()
    }

    pub fn pmf(&self, y: f64) -> f64 {
        self.ln_pmf(y).exp()
    }

    /// Draws a single count using the gamma-Poisson mixture: a Poisson rate is drawn from
    /// `Gamma(k, μ/k)` and a count from `Poisson(rate)`.
    ///
    /// # Arguments
    /// * `rng` - A random number generator.
    ///
    /// # Returns
    /// The sampled count or an error if the underlying distributions rejected their parameters.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<u64> {
        let k = self.dispersion;
        let gamma = Gamma::new(k, self.mean / k)
            .map_err(|e| MlErr::InvalidInput(format!("gamma mixture: {e}")))?;

        let rate = gamma.sample(rng);
        if rate <= f64::MIN_POSITIVE {
            return Ok(0);
        }

        let poisson =
            Poisson::new(rate).map_err(|e| MlErr::InvalidInput(format!("poisson rate: {e}")))?;

        Ok(poisson.sample(rng) as u64)
    }

    /// Draws `n` counts.
    pub fn sample_n<R: Rng + ?Sized>(&self, rng: &mut R, n: usize) -> Result<Vec<u64>> {
        (0..n).map(|_| self.sample(rng)).collect()
    }

    /// The cumulative distribution `P(Y <= y)`, computed as the regularized incomplete beta
    /// function `I_p(k, y + 1)` with `p = k / (k + μ)`.
    pub fn cdf(&self, y: u64) -> f64 {
        special::beta_reg(self.dispersion, y as f64 + 1., self.success_prob())
    }

    /// The smallest count whose cumulative probability is at least `p`.
    ///
    /// The search brackets the answer by doubling from the mean and then bisects, the cdf being
    /// monotonic in the count.
    ///
    /// # Arguments
    /// * `p` - The target probability, clamped to `[0, 1)`.
    pub fn quantile(&self, p: f64) -> u64 {
        let p = p.clamp(0., 1. - f64::EPSILON);
        if self.cdf(0) >= p {
            return 0;
        }

        let mut lo = 0;
        let mut hi = (self.mean.ceil() as u64).max(1);

        while self.cdf(hi) < p {
            if hi >= MAX_COUNT {
                return MAX_COUNT;
            }

            lo = hi;
            hi = hi.saturating_mul(2).min(MAX_COUNT);
        }

        // invariant: cdf(lo) < p <= cdf(hi)
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.cdf(mid) >= p {
                hi = mid;
            } else {
                lo = mid;
            }
        }

        hi
    }

    /// A central interval holding at least `level` of the probability mass.
    ///
    /// # Returns
    /// The `(1 - level) / 2` and `(1 + level) / 2` quantiles.
    pub fn interval(&self, level: f64) -> (u64, u64) {
        let tail = (1. - level.clamp(0., 1.)) / 2.;
        (self.quantile(tail), self.quantile(1. - tail))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn cdf_by_summation(nb: &NegativeBinomial, y: u64) -> f64 {
        (0..=y).map(|i| nb.pmf(i as f64)).sum()
    }

    fn sample_variance(xs: &[u64]) -> f64 {
        let n = xs.len() as f64;
        let mean = xs.iter().map(|&x| x as f64).sum::<f64>() / n;
        xs.iter().map(|&x| (x as f64 - mean).powi(2)).sum::<f64>() / (n - 1.)
    }

    #[test]
    fn pmf_sums_to_one() {
        let nb = NegativeBinomial::new(7.5, 2.);
        let total: f64 = (0..500).map(|y| nb.pmf(y as f64)).sum();
        assert!((total - 1.).abs() < 1e-9);
    }

    #[test]
    fn large_dispersion_converges_to_poisson() {
        let nb = NegativeBinomial::new(4., 1e9);
        // Poisson(4) at y = 2
        let poisson = (-4f64).exp() * 16. / 2.;
        assert!((nb.pmf(2.) - poisson).abs() < 1e-6);
        assert!((nb.variance() - 4.).abs() < 1e-6);
    }

    #[test]
    fn small_dispersion_blows_up_the_variance() {
        let nb = NegativeBinomial::new(10., 1e-4);
        assert!(nb.variance() > 1e5);
    }

    #[test]
    fn parameters_are_clamped() {
        let nb = NegativeBinomial::new(0., -1.);
        assert!(nb.mean() > 0.);
        assert!(nb.dispersion() > 0.);
        assert!(nb.ln_pmf(0.).is_finite());
    }

    #[test]
    fn cdf_matches_the_summed_pmf() {
        let nb = NegativeBinomial::new(12., 3.);
        for y in [0, 1, 5, 12, 30, 80] {
            assert!((nb.cdf(y) - cdf_by_summation(&nb, y)).abs() < 1e-9, "y = {y}");
        }
    }

    #[test]
    fn quantile_is_the_smallest_count_reaching_the_target() {
        let nb = NegativeBinomial::new(50., 10.);
        for p in [0.05, 0.25, 0.5, 0.9, 0.99] {
            let q = nb.quantile(p);
            assert!(nb.cdf(q) >= p);
            if q > 0 {
                assert!(nb.cdf(q - 1) < p);
            }
        }
    }

    #[test]
    fn interval_contains_the_mean() {
        let nb = NegativeBinomial::new(50., 10.);
        let (lo, hi) = nb.interval(0.8);
        assert!(lo < 50 && hi > 50);
    }

    #[test]
    fn near_poisson_sampling_variance() {
        let mut rng = StdRng::seed_from_u64(7);
        let xs = NegativeBinomial::new(50., 1000.)
            .sample_n(&mut rng, 20_000)
            .unwrap();
        let var = sample_variance(&xs);
        assert!((var - 50.).abs() / 50. < 0.1, "variance {var}");
    }

    #[test]
    fn overdispersed_sampling_variance() {
        let mut rng = StdRng::seed_from_u64(7);
        let xs = NegativeBinomial::new(50., 1.).sample_n(&mut rng, 20_000).unwrap();
        let var = sample_variance(&xs);
        assert!(var >= 10. * 50., "variance {var}");
    }

    proptest! {
        #[test]
        fn variance_follows_the_closed_form(mu in 0.01f64..1e4, k in 0.01f64..1e4) {
            let nb = NegativeBinomial::new(mu, k);
            let expected = mu + mu * mu / k;
            prop_assert!((nb.variance() - expected).abs() <= 1e-9 * expected);
        }

        #[test]
        fn variance_tends_to_the_mean(mu in 0.01f64..1e3) {
            let nb = NegativeBinomial::new(mu, 1e12);
            prop_assert!((nb.variance() - mu).abs() <= 1e-6 * mu.max(1.));
        }
    }
}

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::{MlErr, Result, distribution::NegativeBinomial, special::clamp_positive};

/// The predicted demand distribution for a single forecast step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub mean: f64,
    pub dispersion: f64,
}

impl Forecast {
    pub fn new(mean: f64, dispersion: f64) -> Self {
        Self {
            mean: clamp_positive(mean),
            dispersion: clamp_positive(dispersion),
        }
    }

    pub fn distribution(&self) -> NegativeBinomial {
        NegativeBinomial::new(self.mean, self.dispersion)
    }

    pub fn variance(&self) -> f64 {
        self.distribution().variance()
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// The normal approximation of the central `level` interval, `mean ± z·std_dev` with the
    /// lower bound floored at zero.
    ///
    /// # Returns
    /// The `(lower, upper)` bounds or an error if `level` is not in `(0, 1)`.
    pub fn interval(&self, level: f64) -> Result<(f64, f64)> {
        check_level(level)?;

        let z = Normal::new(0., 1.)
            .map_err(|e| MlErr::InvalidConfig(e.to_string()))?
            .inverse_cdf(0.5 + level / 2.);
        let half = z * self.std_dev();
        Ok(((self.mean - half).max(0.), self.mean + half))
    }

    /// The exact central `level` interval, given by the Negative Binomial quantiles.
    ///
    /// # Returns
    /// The `(lower, upper)` counts or an error if `level` is not in `(0, 1)`.
    pub fn quantile_interval(&self, level: f64) -> Result<(u64, u64)> {
        check_level(level)?;
        Ok(self.distribution().interval(level))
    }
}

fn check_level(level: f64) -> Result<()> {
    if level > 0. && level < 1. {
        return Ok(());
    }

    Err(MlErr::InvalidInput(format!(
        "interval level must be in (0, 1), got {level}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variance_follows_the_dispersion() {
        let forecast = Forecast::new(50., 10.);
        assert!((forecast.variance() - 300.).abs() < 1e-9);
        assert!((forecast.std_dev() - 300f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn normal_interval_is_symmetric_and_floored() {
        let (lo, hi) = Forecast::new(50., 1e9).interval(0.95).unwrap();
        assert!((hi - 50. - 1.959964 * 50f64.sqrt()).abs() < 1e-3);
        assert!((50. - lo - (hi - 50.)).abs() < 1e-9);

        let (lo, _) = Forecast::new(1., 0.1).interval(0.95).unwrap();
        assert_eq!(lo, 0.);
    }

    #[test]
    fn quantile_interval_brackets_the_mean() {
        let (lo, hi) = Forecast::new(20., 5.).quantile_interval(0.9).unwrap();
        assert!(lo < 20 && 20 < hi);
    }

    #[test]
    fn levels_outside_the_unit_interval_fail() {
        let forecast = Forecast::new(1., 1.);
        assert!(forecast.interval(1.).is_err());
        assert!(forecast.quantile_interval(0.).is_err());
    }
}

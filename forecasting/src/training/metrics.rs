use serde::{Deserialize, Serialize};

use crate::{
    MlErr, Result, arch::loss::nll, error::check_size, forecast::Forecast,
};

/// Point and probabilistic accuracy of a set of forecasts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Mean absolute error of the predicted means.
    pub mae: f64,
    /// Root mean squared error of the predicted means.
    pub rmse: f64,
    /// Mean Negative Binomial negative log-likelihood.
    pub nll: f64,
    /// Fraction of observations inside the central `level` quantile interval.
    pub coverage: f64,
    pub level: f64,
}

impl Metrics {
    /// Scores `forecasts` against the observed counts `y`.
    ///
    /// # Arguments
    /// * `forecasts` - The predicted distributions.
    /// * `y` - The observed counts, one per forecast.
    /// * `level` - The probability mass of the intervals used for the coverage.
    ///
    /// # Returns
    /// The metrics or an error if the lengths differ, there are no forecasts or `level` is not in
    /// `(0, 1)`.
    pub fn evaluate(forecasts: &[Forecast], y: &[f64], level: f64) -> Result<Self> {
        check_size("observations", y.len(), forecasts.len())?;
        if forecasts.is_empty() {
            return Err(MlErr::InvalidInput("no forecasts to evaluate".into()));
        }

        let means: Vec<f64> = forecasts.iter().map(|f| f.mean).collect();
        let mut covered = 0;
        for (forecast, &y) in forecasts.iter().zip(y) {
            let (lo, hi) = forecast.quantile_interval(level)?;
            if (lo as f64..=hi as f64).contains(&y) {
                covered += 1;
            }
        }

        let n = forecasts.len() as f64;
        Ok(Self {
            mae: mae(&means, y),
            rmse: rmse(&means, y),
            nll: forecasts
                .iter()
                .zip(y)
                .map(|(f, &y)| nll(f.mean, f.dispersion, y))
                .sum::<f64>()
                / n,
            coverage: covered as f64 / n,
            level,
        })
    }
}

pub fn mae(y_pred: &[f64], y: &[f64]) -> f64 {
    let n = y_pred.len().max(1) as f64;
    y_pred.iter().zip(y).map(|(p, y)| (p - y).abs()).sum::<f64>() / n
}

pub fn rmse(y_pred: &[f64], y: &[f64]) -> f64 {
    let n = y_pred.len().max(1) as f64;
    (y_pred.iter().zip(y).map(|(p, y)| (p - y).powi(2)).sum::<f64>() / n).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_errors() {
        assert_eq!(mae(&[1., 2., 3.], &[2., 2., 5.]), 1.);
        assert_eq!(rmse(&[0., 0.], &[3., 4.]), 12.5f64.sqrt());
    }

    #[test]
    fn coverage_counts_observations_in_the_interval() {
        let forecasts = [Forecast::new(10., 1000.); 4];
        let y = [10., 9., 11., 1000.];

        let metrics = Metrics::evaluate(&forecasts, &y, 0.9).unwrap();
        assert_eq!(metrics.coverage, 0.75);
        assert!(metrics.nll.is_finite());
    }

    #[test]
    fn empty_or_mismatched_inputs_fail() {
        assert!(Metrics::evaluate(&[], &[], 0.9).is_err());
        assert!(Metrics::evaluate(&[Forecast::new(1., 1.)], &[1., 2.], 0.9).is_err());
        assert!(Metrics::evaluate(&[Forecast::new(1., 1.)], &[1.], 1.5).is_err());
    }
}

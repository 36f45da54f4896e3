//! Per-timestep feature construction for demand series.
//!
//! Every timestep gets [`FEATURES_PER_STEP`] features, in order: the normalized usage, a Monday
//! first day-of-week one-hot, the sine and cosine of the ISO week of the year and the four
//! exogenous risk signals.

use std::f64::consts::TAU;

use chrono::{Datelike, NaiveDate};
use ndarray::{Array1, Array2, Array3, ArrayView2, s};
use serde::{Deserialize, Serialize};

use crate::{
    MlErr, Result,
    dataset::{Dataset, Targets},
    error::check_size,
};

/// The width of a feature row built by [`build_features`].
pub const FEATURES_PER_STEP: usize = 1 + 7 + 2 + RiskSignals::LEN;

const WEEKS_PER_YEAR: f64 = 52.;

/// Exogenous signals that raise or lower demand, each one in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskSignals {
    /// Whether there is an event or promotion.
    pub event: f64,
    pub weather_severity: f64,
    pub traffic_index: f64,
    /// Whether there is a hazard.
    pub hazard: f64,
}

impl RiskSignals {
    pub const LEN: usize = 4;

    /// Returns the signals clamped to `[0, 1]`, `NaN`s mapped to zero.
    pub fn clamped(&self) -> Self {
        let clamp = |v: f64| if v.is_nan() { 0. } else { v.clamp(0., 1.) };
        Self {
            event: clamp(self.event),
            weather_severity: clamp(self.weather_severity),
            traffic_index: clamp(self.traffic_index),
            hazard: clamp(self.hazard),
        }
    }

    pub fn to_array(&self) -> [f64; 4] {
        let Self {
            event,
            weather_severity,
            traffic_index,
            hazard,
        } = self.clamped();
        [event, weather_severity, traffic_index, hazard]
    }
}

/// A Monday first one-hot encoding of the day of the week.
pub fn day_of_week_one_hot(date: NaiveDate) -> [f64; 7] {
    let mut one_hot = [0.; 7];
    one_hot[date.weekday().num_days_from_monday() as usize] = 1.;
    one_hot
}

/// The ISO week of the year mapped onto the unit circle, `(sin, cos)`.
pub fn week_of_year_cyclical(date: NaiveDate) -> (f64, f64) {
    let angle = TAU * date.iso_week().week() as f64 / WEEKS_PER_YEAR;
    (angle.sin(), angle.cos())
}

/// A z-score normalization of usage, fitted on the training part of a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageScaler {
    pub mean: f64,
    pub std_dev: f64,
}

impl UsageScaler {
    /// Fits the scaler on `usage`, a constant series gets a unit standard deviation.
    ///
    /// # Returns
    /// A new `UsageScaler` or an error if `usage` is empty.
    pub fn fit(usage: &[f64]) -> Result<Self> {
        if usage.is_empty() {
            return Err(MlErr::InvalidInput("cannot fit a scaler on no usage".into()));
        }

        let n = usage.len() as f64;
        let mean = usage.iter().sum::<f64>() / n;
        let var = usage.iter().map(|u| (u - mean).powi(2)).sum::<f64>() / n;
        let std_dev = if var > 0. { var.sqrt() } else { 1. };
        Ok(Self { mean, std_dev })
    }

    pub fn transform(&self, usage: f64) -> f64 {
        (usage - self.mean) / self.std_dev
    }

    pub fn inverse(&self, scaled: f64) -> f64 {
        scaled * self.std_dev + self.mean
    }
}

/// Builds the `(time, FEATURES_PER_STEP)` feature matrix of a series.
///
/// # Arguments
/// * `dates` - The date of every timestep.
/// * `usage` - The observed usage at every timestep.
/// * `risks` - The risk signals at every timestep, zeros when not given.
/// * `scaler` - The usage normalization.
///
/// # Returns
/// The feature matrix or an error if the lengths don't agree.
pub fn build_features(
    dates: &[NaiveDate],
    usage: &[f64],
    risks: Option<&[RiskSignals]>,
    scaler: &UsageScaler,
) -> Result<Array2<f64>> {
    check_size("usage", usage.len(), dates.len())?;
    if let Some(risks) = risks {
        check_size("risk signals", risks.len(), dates.len())?;
    }

    let mut features = Array2::zeros((dates.len(), FEATURES_PER_STEP));
    for (t, (&date, &u)) in dates.iter().zip(usage).enumerate() {
        let mut row = features.row_mut(t);
        row[0] = scaler.transform(u);
        row.slice_mut(s![1..8])
            .assign(&Array1::from(day_of_week_one_hot(date).to_vec()));

        let (sin, cos) = week_of_year_cyclical(date);
        row[8] = sin;
        row[9] = cos;

        if let Some(risks) = risks {
            row.slice_mut(s![10..])
                .assign(&Array1::from(risks[t].to_array().to_vec()));
        }
    }

    Ok(features)
}

fn window_count(len: usize, seq_len: usize, horizon: usize) -> Result<usize> {
    if seq_len == 0 || horizon == 0 {
        return Err(MlErr::InvalidConfig(
            "window length and horizon must be positive".into(),
        ));
    }

    match len.checked_sub(seq_len + horizon) {
        Some(extra) => Ok(extra + 1),
        None => Err(MlErr::InvalidInput(format!(
            "a series of {len} steps is too short for windows of {seq_len} and a horizon of {horizon}"
        ))),
    }
}

/// Slides a `seq_len` window over the series, the target of each window being the count
/// `horizon` steps after its last timestep.
///
/// # Arguments
/// * `features` - The `(time, features)` feature matrix.
/// * `targets` - The observed count at every timestep.
/// * `seq_len` - The length of the windows.
/// * `horizon` - How far after the window the target is.
///
/// # Returns
/// A chronologically ordered dataset or an error if the series is too short.
pub fn make_windows(
    features: ArrayView2<f64>,
    targets: &[f64],
    seq_len: usize,
    horizon: usize,
) -> Result<Dataset> {
    check_size("window targets", targets.len(), features.nrows())?;
    let n = window_count(targets.len(), seq_len, horizon)?;

    let mut x = Array3::zeros((n, seq_len, features.ncols()));
    for (i, mut window) in x.outer_iter_mut().enumerate() {
        window.assign(&features.slice(s![i..i + seq_len, ..]));
    }
    let y = Array1::from_shape_fn(n, |i| targets[i + seq_len - 1 + horizon]);

    Dataset::new(x, Targets::Last(y))
}

/// Like [`make_windows`], but every timestep of a window gets its own target, the count
/// `horizon` steps after it.
pub fn make_sequence_windows(
    features: ArrayView2<f64>,
    targets: &[f64],
    seq_len: usize,
    horizon: usize,
) -> Result<Dataset> {
    check_size("window targets", targets.len(), features.nrows())?;
    let n = window_count(targets.len(), seq_len, horizon)?;

    let mut x = Array3::zeros((n, seq_len, features.ncols()));
    for (i, mut window) in x.outer_iter_mut().enumerate() {
        window.assign(&features.slice(s![i..i + seq_len, ..]));
    }
    let y = Array2::from_shape_fn((n, seq_len), |(i, t)| targets[i + t + horizon]);

    Dataset::new(x, Targets::Sequence(y))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn monday_is_the_first_day() {
        // 2024-01-01 was a Monday
        assert_eq!(day_of_week_one_hot(date(2024, 1, 1)), [1., 0., 0., 0., 0., 0., 0.]);
        assert_eq!(day_of_week_one_hot(date(2024, 1, 7)), [0., 0., 0., 0., 0., 0., 1.]);
    }

    #[test]
    fn week_encoding_is_on_the_unit_circle_and_wraps() {
        let (sin, cos) = week_of_year_cyclical(date(2024, 6, 15));
        assert!((sin * sin + cos * cos - 1.).abs() < 1e-12);

        // ISO week 52 and week 1 are neighbours
        let (s52, c52) = week_of_year_cyclical(date(2024, 12, 25));
        let (s1, c1) = week_of_year_cyclical(date(2025, 1, 1));
        assert!(((s52 - s1).powi(2) + (c52 - c1).powi(2)).sqrt() < 0.3);
    }

    #[test]
    fn risk_signals_are_clamped() {
        let risks = RiskSignals {
            event: 2.,
            weather_severity: -1.,
            traffic_index: 0.4,
            hazard: f64::NAN,
        };
        assert_eq!(risks.to_array(), [1., 0., 0.4, 0.]);
    }

    #[test]
    fn scaler_round_trips_and_handles_constants() {
        let scaler = UsageScaler::fit(&[2., 4., 6.]).unwrap();
        assert!((scaler.inverse(scaler.transform(5.)) - 5.).abs() < 1e-12);
        assert_eq!(scaler.transform(4.), 0.);

        let flat = UsageScaler::fit(&[3., 3.]).unwrap();
        assert_eq!(flat.std_dev, 1.);
        assert!(UsageScaler::fit(&[]).is_err());
    }

    #[test]
    fn feature_rows_follow_the_layout() {
        let dates = [date(2024, 1, 3), date(2024, 1, 4)];
        let usage = [10., 20.];
        let risks = [RiskSignals::default(), RiskSignals {
            event: 1.,
            ..Default::default()
        }];
        let scaler = UsageScaler::fit(&usage).unwrap();

        let features = build_features(&dates, &usage, Some(&risks), &scaler).unwrap();
        assert_eq!(features.dim(), (2, FEATURES_PER_STEP));
        assert_eq!(features[[0, 0]], -1.);
        // Wednesday
        assert_eq!(features[[0, 3]], 1.);
        assert_eq!(features[[1, 10]], 1.);
        assert!(build_features(&dates, &usage[..1], None, &scaler).is_err());
    }

    #[test]
    fn windows_target_the_step_after_the_horizon() {
        let features = Array2::from_shape_fn((10, 1), |(t, _)| t as f64);
        let targets: Vec<f64> = (0..10).map(|t| 100. + t as f64).collect();

        let ds = make_windows(features.view(), &targets, 4, 2).unwrap();
        assert_eq!(ds.len(), 5);
        assert_eq!(ds.x()[[0, 3, 0]], 3.);
        let Targets::Last(y) = ds.y() else {
            unreachable!()
        };
        // window 0..4 ends at t = 3, two steps later is t = 5
        assert_eq!(y[0], 105.);
        assert_eq!(y[4], 109.);

        assert!(make_windows(features.view(), &targets, 9, 2).is_err());
    }

    #[test]
    fn sequence_windows_shift_every_step() {
        let features = Array2::zeros((6, 2));
        let targets: Vec<f64> = (0..6).map(f64::from).collect();

        let ds = make_sequence_windows(features.view(), &targets, 3, 1).unwrap();
        let Targets::Sequence(y) = ds.y() else {
            unreachable!()
        };
        assert_eq!(y.dim(), (3, 3));
        assert_eq!(y.row(2).to_vec(), [3., 4., 5.]);
    }
}

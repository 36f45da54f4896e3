//! Central difference validation of analytic gradients.

use log::debug;
use ndarray::Axis;

use crate::{
    MlErr, Result,
    arch::{Model, loss::LossFn},
    dataset::{Batch, Targets},
};

/// The summary of a passed gradient check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradCheckReport {
    /// The amount of compared partial derivatives.
    pub checked: usize,
    pub max_abs_diff: f64,
    pub max_rel_diff: f64,
}

/// Compares analytic gradients against `(f(x + h) - f(x - h)) / 2h`.
///
/// A partial derivative passes when `|analytic - numerical| <= atol + rtol · max(|analytic|,
/// |numerical|)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientChecker {
    step: f64,
    rtol: f64,
    atol: f64,
    max_params: Option<usize>,
}

impl Default for GradientChecker {
    fn default() -> Self {
        Self {
            step: 1e-6,
            rtol: 1e-3,
            atol: 1e-6,
            max_params: None,
        }
    }
}

impl GradientChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step;
        self
    }

    pub fn with_tolerances(mut self, rtol: f64, atol: f64) -> Self {
        self.rtol = rtol;
        self.atol = atol;
        self
    }

    /// Only checks `max_params` evenly spaced parameters.
    pub fn with_max_params(mut self, max_params: usize) -> Self {
        self.max_params = Some(max_params);
        self
    }

    /// Checks an analytic gradient of a scalar function.
    ///
    /// # Arguments
    /// * `f` - The function, evaluated at `x`.
    /// * `x` - The point where the gradient is checked, restored before returning.
    /// * `analytic` - The gradient to check.
    ///
    /// # Returns
    /// The report or a `GradientCheck` error on the first mismatch.
    pub fn check<F>(&self, mut f: F, x: &mut [f64], analytic: &[f64]) -> Result<GradCheckReport>
    where
        F: FnMut(&[f64]) -> Result<f64>,
    {
        crate::error::check_size("analytic gradient", analytic.len(), x.len())?;
        self.compare(analytic, |i| {
            let at = x[i];
            x[i] = at + self.step;
            let plus = f(&*x);
            x[i] = at - self.step;
            let minus = f(&*x);
            x[i] = at;
            Ok((plus? - minus?) / (2. * self.step))
        })
    }

    /// Checks the gradient a model computes for every parameter on a batch.
    ///
    /// Runs in evaluation mode so dropout stays deterministic, and leaves the model in training
    /// mode.
    ///
    /// # Arguments
    /// * `model` - The model whose backward pass is checked, its parameters end up unchanged.
    /// * `loss_fn` - The loss the gradient is taken of.
    /// * `batch` - The inputs and targets.
    ///
    /// # Returns
    /// The report or a `GradientCheck` error on the first mismatch.
    pub fn check_model<M, L>(
        &self,
        model: &mut M,
        loss_fn: &L,
        batch: &Batch,
    ) -> Result<GradCheckReport>
    where
        M: Model,
        L: LossFn,
    {
        model.set_training(false);
        let result = self.check_model_inner(model, loss_fn, batch);
        model.set_training(true);
        result
    }

    fn check_model_inner<M, L>(
        &self,
        model: &mut M,
        loss_fn: &L,
        batch: &Batch,
    ) -> Result<GradCheckReport>
    where
        M: Model,
        L: LossFn,
    {
        backward(model, loss_fn, batch)?;
        let analytic = model.grad().to_vec();

        self.compare(&analytic, |i| {
            let at = model.params()[i];
            model.params_and_grad_mut().0[i] = at + self.step;
            let plus = loss(model, loss_fn, batch);
            model.params_and_grad_mut().0[i] = at - self.step;
            let minus = loss(model, loss_fn, batch);
            model.params_and_grad_mut().0[i] = at;
            Ok((plus? - minus?) / (2. * self.step))
        })
    }

    fn compare<F>(&self, analytic: &[f64], mut numerical: F) -> Result<GradCheckReport>
    where
        F: FnMut(usize) -> Result<f64>,
    {
        let n = analytic.len();
        let stride = match self.max_params {
            Some(max) if max > 0 && max < n => n.div_ceil(max),
            _ => 1,
        };

        let mut report = GradCheckReport {
            checked: 0,
            max_abs_diff: 0.,
            max_rel_diff: 0.,
        };

        for index in (0..n).step_by(stride) {
            let numerical = numerical(index)?;
            let analytic = analytic[index];
            let diff = (analytic - numerical).abs();
            let scale = analytic.abs().max(numerical.abs());

            report.checked += 1;
            report.max_abs_diff = report.max_abs_diff.max(diff);
            if scale > 0. {
                report.max_rel_diff = report.max_rel_diff.max(diff / scale);
            }

            if diff.is_nan() || diff > self.atol + self.rtol * scale {
                return Err(MlErr::GradientCheck {
                    index,
                    analytic,
                    numerical,
                    max_abs_diff: report.max_abs_diff,
                });
            }
        }

        debug!(
            checked = report.checked,
            max_abs_diff = report.max_abs_diff,
            max_rel_diff = report.max_rel_diff;
            "gradient check passed"
        );
        Ok(report)
    }
}

fn loss<M: Model, L: LossFn>(model: &mut M, loss_fn: &L, batch: &Batch) -> Result<f64> {
    match &batch.y {
        Targets::Last(y) => {
            let out = model.forward(batch.x.view(), None)?;
            loss_fn.loss(out.mean.view(), out.dispersion.view(), y.view())
        }
        Targets::Sequence(y) => {
            let out = model.forward_sequence(batch.x.view(), None)?;
            let y = y.view().insert_axis(Axis(2));
            loss_fn.loss(out.mean.view(), out.dispersion.view(), y)
        }
    }
}

fn backward<M: Model, L: LossFn>(model: &mut M, loss_fn: &L, batch: &Batch) -> Result<()> {
    match &batch.y {
        Targets::Last(y) => {
            let out = model.forward(batch.x.view(), None)?;
            let (d_mean, d_dispersion) =
                loss_fn.loss_prime(out.mean.view(), out.dispersion.view(), y.view())?;
            model.backward(d_mean.view(), d_dispersion.view())?;
        }
        Targets::Sequence(y) => {
            let out = model.forward_sequence(batch.x.view(), None)?;
            let y = y.view().insert_axis(Axis(2));
            let (d_mean, d_dispersion) =
                loss_fn.loss_prime(out.mean.view(), out.dispersion.view(), y)?;
            model.backward_sequence(d_mean.view(), d_dispersion.view())?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_gradient_passes() {
        let f = |x: &[f64]| Ok(x[0] * x[0] + 3. * x[0] * x[1]);
        let mut x = [1.5, -2.];
        let analytic = [2. * 1.5 + 3. * -2., 3. * 1.5];

        let report = GradientChecker::new().check(f, &mut x, &analytic).unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(x, [1.5, -2.]);
    }

    #[test]
    fn wrong_gradient_is_reported() {
        let f = |x: &[f64]| Ok(x[0].sin() + x[1].powi(3));
        let mut x = [0.3, 1.];
        let analytic = [0.3f64.cos(), 2.];

        let Err(MlErr::GradientCheck {
            index, numerical, ..
        }) = GradientChecker::new().check(f, &mut x, &analytic)
        else {
            panic!("expected a gradient check error");
        };
        assert_eq!(index, 1);
        assert!((numerical - 3.).abs() < 1e-6);
    }

    #[test]
    fn max_params_subsamples() {
        let f = |x: &[f64]| Ok(x.iter().sum::<f64>());
        let mut x = [0.; 10];

        let report = GradientChecker::new()
            .with_max_params(3)
            .check(f, &mut x, &[1.; 10])
            .unwrap();
        assert_eq!(report.checked, 3);
    }
}

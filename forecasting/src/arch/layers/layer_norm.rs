use ndarray::prelude::*;

use crate::{
    MlErr, Result,
    arch::ParamShape,
    error::{check_shape, check_size},
};

const EPS: f64 = 1e-5;

#[derive(Debug, Clone)]
struct Cache {
    x_hat: Array2<f64>,
    inv_std: Array1<f64>,
}

/// Normalizes every row over the feature axis, then applies a learnable scale and shift.
///
/// The parameters are laid out as the `features` scale (`gamma`) followed by the `features`
/// shift (`beta`).
#[derive(Debug, Clone)]
pub struct LayerNorm {
    features: usize,
    cache: Option<Cache>,
}

impl LayerNorm {
    pub fn new(features: usize) -> Self {
        Self {
            features,
            cache: None,
        }
    }

    pub fn size(&self) -> usize {
        2 * self.features
    }

    pub fn param_shapes(&self) -> Vec<ParamShape> {
        vec![
            ParamShape::new("gamma", &[self.features]),
            ParamShape::new("beta", &[self.features]),
        ]
    }

    /// Sets a unit scale and a zero shift.
    pub fn init(&self, params: &mut [f64]) -> Result<()> {
        check_size("layer norm parameters", params.len(), self.size())?;

        let (gamma, beta) = params.split_at_mut(self.features);
        gamma.fill(1.);
        beta.fill(0.);
        Ok(())
    }

    /// Makes a forward pass through the layer.
    ///
    /// # Arguments
    /// * `params` - This layer's parameters.
    /// * `x` - The `(rows, features)` input.
    ///
    /// # Returns
    /// The normalized, scaled and shifted input.
    pub fn forward(&mut self, params: &[f64], x: Array2<f64>) -> Result<Array2<f64>> {
        check_size("layer norm input features", x.ncols(), self.features)?;
        let (gamma, beta) = self.view(params)?;

        let n = self.features as f64;
        let mean = x.sum_axis(Axis(1)) / n;
        let mut x_hat = x - &mean.view().insert_axis(Axis(1));
        let var = x_hat.mapv(|v| v * v).sum_axis(Axis(1)) / n;
        let inv_std = var.mapv(|v| 1. / (v + EPS).sqrt());
        x_hat *= &inv_std.view().insert_axis(Axis(1));

        let y = &x_hat * &gamma + &beta;
        self.cache = Some(Cache { x_hat, inv_std });
        Ok(y)
    }

    /// Makes a backward pass through the layer.
    ///
    /// # Arguments
    /// * `params` - This layer's parameters.
    /// * `grad` - This layer's gradient buffer, it gets overwritten.
    /// * `d` - The gradient of the loss with respect to the output.
    ///
    /// # Returns
    /// The gradient of the loss with respect to the input.
    pub fn backward(
        &mut self,
        params: &[f64],
        grad: &mut [f64],
        d: ArrayView2<f64>,
    ) -> Result<Array2<f64>> {
        let Cache { x_hat, inv_std } = self
            .cache
            .take()
            .ok_or(MlErr::MissingCache { layer: "layer norm" })?;
        check_shape("layer norm gradient", d.shape(), x_hat.shape())?;
        check_size("layer norm gradient buffer", grad.len(), self.size())?;

        let (gamma, _) = self.view(params)?;
        let (dgamma, dbeta) = grad.split_at_mut(self.features);
        let mut dgamma = ArrayViewMut1::from_shape(self.features, dgamma)?;
        let mut dbeta = ArrayViewMut1::from_shape(self.features, dbeta)?;
        dgamma.assign(&(&d * &x_hat).sum_axis(Axis(0)));
        dbeta.assign(&d.sum_axis(Axis(0)));

        // dx = inv_std / n · (n·dx̂ - Σdx̂ - x̂·Σ(dx̂·x̂)), row wise
        let n = self.features as f64;
        let dx_hat = &d * &gamma;
        let sum_dx_hat = dx_hat.sum_axis(Axis(1)).insert_axis(Axis(1));
        let sum_dx_hat_x_hat = (&dx_hat * &x_hat).sum_axis(Axis(1)).insert_axis(Axis(1));
        let scale = (inv_std / n).insert_axis(Axis(1));

        let dx = (dx_hat * n - &sum_dx_hat - &x_hat * &sum_dx_hat_x_hat) * &scale;
        Ok(dx)
    }

    fn view<'a>(&self, params: &'a [f64]) -> Result<(ArrayView1<'a, f64>, ArrayView1<'a, f64>)> {
        check_size("layer norm parameters", params.len(), self.size())?;

        let (gamma, beta) = params.split_at(self.features);
        Ok((
            ArrayView1::from_shape(self.features, gamma)?,
            ArrayView1::from_shape(self.features, beta)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn unit_params(features: usize) -> Vec<f64> {
        let norm = LayerNorm::new(features);
        let mut params = vec![0.; norm.size()];
        norm.init(&mut params).unwrap();
        params
    }

    #[test]
    fn rows_get_zero_mean_and_unit_variance() {
        let mut norm = LayerNorm::new(4);
        let params = unit_params(4);

        let y = norm
            .forward(&params, array![[1., 2., 3., 4.], [10., 0., 10., 0.]])
            .unwrap();

        for row in y.rows() {
            let mean = row.sum() / 4.;
            let var = row.mapv(|v| (v - mean).powi(2)).sum() / 4.;
            assert!(mean.abs() < 1e-12);
            assert!((var - 1.).abs() < 1e-4);
        }
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut norm = LayerNorm::new(3);
        let params = vec![1.5, -0.5, 2., 0.1, 0.2, -0.3];
        let x = array![[0.3, -1.2, 2.0], [1.0, 0.5, -0.7]];
        // weighted sum so the gradient doesn't vanish through the normalization
        let w = array![[1., 2., -1.], [0.5, -3., 1.]];
        let loss = |norm: &mut LayerNorm, params: &[f64], x: &Array2<f64>| {
            (norm.forward(params, x.clone()).unwrap() * &w).sum()
        };

        norm.forward(&params, x.clone()).unwrap();
        let mut grad = vec![0.; norm.size()];
        let dx = norm.backward(&params, &mut grad, w.view()).unwrap();

        let h = 1e-6;
        for i in 0..params.len() {
            let mut plus = params.clone();
            plus[i] += h;
            let mut minus = params.clone();
            minus[i] -= h;
            let num = (loss(&mut norm, &plus, &x) - loss(&mut norm, &minus, &x)) / (2. * h);
            assert!((num - grad[i]).abs() < 1e-5, "param {i}: {num} vs {}", grad[i]);
        }

        for (idx, &analytic) in dx.indexed_iter() {
            let mut plus = x.clone();
            plus[idx] += h;
            let mut minus = x.clone();
            minus[idx] -= h;
            let num =
                (loss(&mut norm, &params, &plus) - loss(&mut norm, &params, &minus)) / (2. * h);
            assert!((num - analytic).abs() < 1e-5, "input {idx:?}: {num} vs {analytic}");
        }
    }

    #[test]
    fn backward_without_forward_fails() {
        let mut norm = LayerNorm::new(2);
        let params = unit_params(2);
        let mut grad = vec![0.; 4];
        assert!(norm.backward(&params, &mut grad, array![[1., 1.]].view()).is_err());
    }
}

use ndarray::{linalg, prelude::*};
use rand::Rng;

use crate::{
    MlErr, Result,
    arch::{ParamShape, init},
    error::{check_shape, check_size},
};

/// A fully connected layer, `y = x·W + b`.
///
/// Works on `(rows, features)` inputs, sequences are flattened to `(batch * time, features)`
/// by the callers.
#[derive(Debug, Clone)]
pub struct Dense {
    dim: (usize, usize),
    size: usize,

    // Forward metadata
    x: Option<Array2<f64>>,
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `dim` - The `(input, output)` dimension of the layer.
    ///
    /// # Returns
    /// A new `Dense` instance.
    pub fn new(dim: (usize, usize)) -> Self {
        Self {
            dim,
            size: (dim.0 + 1) * dim.1,
            x: None,
        }
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    pub fn param_shapes(&self) -> Vec<ParamShape> {
        vec![
            ParamShape::new("weight", &[self.dim.0, self.dim.1]),
            ParamShape::new("bias", &[self.dim.1]),
        ]
    }

    /// Initializes the weights with Kaiming normal values and the biases with zeros.
    pub fn init<R: Rng + ?Sized>(&self, params: &mut [f64], rng: &mut R) -> Result<()> {
        check_size("dense parameters", params.len(), self.size)?;

        let (w, b) = params.split_at_mut(self.dim.0 * self.dim.1);
        init::kaiming(w, self.dim.0, rng)?;
        b.fill(0.);
        Ok(())
    }

    /// Makes a forward pass through the layer, caching the input for the backward pass.
    ///
    /// # Arguments
    /// * `params` - This layer's parameters.
    /// * `x` - The `(rows, input)` input.
    ///
    /// # Returns
    /// The `(rows, output)` output or an error if the shapes don't match.
    pub fn forward(&mut self, params: &[f64], x: Array2<f64>) -> Result<Array2<f64>> {
        check_size("dense input features", x.ncols(), self.dim.0)?;

        let (w, b) = self.view_params(params)?;
        let mut z = Array2::zeros((x.nrows(), self.dim.1));
        linalg::general_mat_mul(1.0, &x, &w, 0.0, &mut z);
        z += &b;

        self.x = Some(x);
        Ok(z)
    }

    /// Makes a backward pass through the layer, writing the gradient of its parameters.
    ///
    /// # Arguments
    /// * `params` - This layer's parameters.
    /// * `grad` - This layer's gradient buffer, it gets overwritten.
    /// * `d` - The gradient of the loss with respect to this layer's output.
    ///
    /// # Returns
    /// The gradient of the loss with respect to this layer's input.
    pub fn backward(
        &mut self,
        params: &[f64],
        grad: &mut [f64],
        d: ArrayView2<f64>,
    ) -> Result<Array2<f64>> {
        let x = self.x.take().ok_or(MlErr::MissingCache { layer: "dense" })?;
        check_shape("dense gradient", d.shape(), &[x.nrows(), self.dim.1])?;

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &x.t(), &d, 0.0, &mut dw);
        db.assign(&d.sum_axis(Axis(0)));

        let (w, _) = self.view_params(params)?;
        let mut dx = Array2::zeros((d.nrows(), self.dim.0));
        linalg::general_mat_mul(1.0, &d, &w.t(), 0.0, &mut dx);

        Ok(dx)
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f64],
    ) -> Result<(ArrayViewMut2<'a, f64>, ArrayViewMut1<'a, f64>)> {
        check_size("dense gradient buffer", grad.len(), self.size)?;

        let w_size = self.size - self.dim.1;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw)?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(
        &self,
        params: &'a [f64],
    ) -> Result<(ArrayView2<'a, f64>, ArrayView1<'a, f64>)> {
        check_size("dense parameters", params.len(), self.size)?;

        let w_size = self.size - self.dim.1;
        let weights = ArrayView2::from_shape(self.dim, &params[..w_size])?;
        let biases = ArrayView1::from_shape(self.dim.1, &params[w_size..])?;
        Ok((weights, biases))
    }
}

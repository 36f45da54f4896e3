use ndarray::{Array, Array3, ArrayView1, ArrayView3, Dimension, Ix1, Ix3};
use rand::RngCore;

use crate::error::Result;

/// The Negative Binomial parameters predicted by a model, both with the same shape.
#[derive(Debug, Clone, PartialEq)]
pub struct NbOutput<D: Dimension> {
    pub mean: Array<f64, D>,
    pub dispersion: Array<f64, D>,
}

/// A model that maps `(batch, time, features)` sequences to Negative Binomial parameters and
/// owns its parameters and their gradient as two flat buffers.
pub trait Model {
    /// Returns the amount of parameters in the model.
    fn size(&self) -> usize;

    /// Switches between training and evaluation mode.
    fn set_training(&mut self, training: bool);

    /// Predicts the distribution of the step following each sequence.
    ///
    /// # Arguments
    /// * `x` - The `(batch, time, features)` input.
    /// * `rng` - The source of randomness for stochastic layers, only required in training mode.
    ///
    /// # Returns
    /// The `(batch,)` mean and dispersion.
    fn forward(&mut self, x: ArrayView3<f64>, rng: Option<&mut dyn RngCore>)
    -> Result<NbOutput<Ix1>>;

    /// Predicts the distribution at every timestep of each sequence.
    ///
    /// # Returns
    /// The `(batch, time, 1)` mean and dispersion.
    fn forward_sequence(
        &mut self,
        x: ArrayView3<f64>,
        rng: Option<&mut dyn RngCore>,
    ) -> Result<NbOutput<Ix3>>;

    /// Computes the gradient of the loss with respect to every parameter, after a `forward`.
    ///
    /// # Arguments
    /// * `d_mean` - The `(batch,)` gradient of the loss with respect to the mean.
    /// * `d_dispersion` - The `(batch,)` gradient of the loss with respect to the dispersion.
    ///
    /// # Returns
    /// The gradient of the loss with respect to the input.
    fn backward(&mut self, d_mean: ArrayView1<f64>, d_dispersion: ArrayView1<f64>)
    -> Result<Array3<f64>>;

    /// Computes the gradient of the loss with respect to every parameter, after a
    /// `forward_sequence`.
    fn backward_sequence(
        &mut self,
        d_mean: ArrayView3<f64>,
        d_dispersion: ArrayView3<f64>,
    ) -> Result<Array3<f64>>;

    fn params(&self) -> &[f64];

    fn grad(&self) -> &[f64];

    /// Gives the parameters and their gradient at once, for the optimizers.
    fn params_and_grad_mut(&mut self) -> (&mut [f64], &mut [f64]);

    /// Overwrites every parameter.
    fn load_params(&mut self, values: &[f64]) -> Result<()>;
}

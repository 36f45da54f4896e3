use ndarray::{Array, ArrayView, Dimension};

use crate::Result;

/// A loss over predicted distribution parameters.
pub trait LossFn {
    /// The mean loss over every element.
    fn loss<D: Dimension>(
        &self,
        mean: ArrayView<f64, D>,
        dispersion: ArrayView<f64, D>,
        y: ArrayView<f64, D>,
    ) -> Result<f64>;

    /// The gradient of the mean loss with respect to the mean and the dispersion.
    fn loss_prime<D: Dimension>(
        &self,
        mean: ArrayView<f64, D>,
        dispersion: ArrayView<f64, D>,
        y: ArrayView<f64, D>,
    ) -> Result<(Array<f64, D>, Array<f64, D>)>;
}

use ndarray::Array2;
use rand::Rng;

use crate::{
    Result,
    arch::{
        ParamShape,
        layers::{Dense, Softplus},
    },
    special::EPSILON,
};

/// A distribution parameter head: a `Dense(hidden, 1)` followed by a softplus, floored at
/// `EPSILON` so the output is always strictly positive.
///
/// The floor is treated as the identity on the backward pass.
#[derive(Debug, Clone)]
pub struct PositiveHead {
    dense: Dense,
    act: Softplus,
}

impl PositiveHead {
    pub fn new(hidden: usize) -> Self {
        Self {
            dense: Dense::new((hidden, 1)),
            act: Softplus::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.dense.size()
    }

    pub fn param_shapes(&self) -> Vec<ParamShape> {
        self.dense.param_shapes()
    }

    pub fn init<R: Rng + ?Sized>(&self, params: &mut [f64], rng: &mut R) -> Result<()> {
        self.dense.init(params, rng)
    }

    /// Maps `(rows, hidden)` hidden states to `(rows, 1)` positive values.
    pub fn forward(&mut self, params: &[f64], h: Array2<f64>) -> Result<Array2<f64>> {
        let z = self.dense.forward(params, h)?;
        Ok(self.act.forward(z).mapv_into(|v| v.max(EPSILON)))
    }

    /// Takes the `(rows, 1)` output gradient back to the `(rows, hidden)` hidden states.
    pub fn backward(
        &mut self,
        params: &[f64],
        grad: &mut [f64],
        d: Array2<f64>,
    ) -> Result<Array2<f64>> {
        let d = self.act.backward(d)?;
        self.dense.backward(params, grad, d.view())
    }
}

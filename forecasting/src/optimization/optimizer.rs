use crate::Result;

/// A first order optimization algorithm over flat parameter buffers.
pub trait Optimizer {
    /// Takes a step, modifying `params` in place according to the algorithm's learning rule.
    ///
    /// # Arguments
    /// * `params` - The parameters that are going to be modified.
    /// * `grad` - The gradient used for taking the step.
    ///
    /// # Returns
    /// An error if the lengths of `params` and `grad` differ.
    fn update_params(&mut self, params: &mut [f64], grad: &[f64]) -> Result<()>;

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, learning_rate: f64);

    /// Drops every piece of accumulated state, the next update starts from scratch.
    fn reset(&mut self);
}

impl<O: Optimizer + ?Sized> Optimizer for Box<O> {
    fn update_params(&mut self, params: &mut [f64], grad: &[f64]) -> Result<()> {
        (**self).update_params(params, grad)
    }

    fn learning_rate(&self) -> f64 {
        (**self).learning_rate()
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        (**self).set_learning_rate(learning_rate)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

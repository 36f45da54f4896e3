use super::Optimizer;
use crate::{Result, error::check_size};

/// Gradient descent optimization algorithm, with optional momentum and L2 weight decay.
///
/// `v = momentum·v + (g + weight_decay·p)` then `p -= learning_rate·v`.
#[derive(Debug, Clone)]
pub struct GradientDescent {
    learning_rate: f64,
    momentum: f64,
    weight_decay: f64,
    velocity: Option<Vec<f64>>,
}

impl GradientDescent {
    /// Returns a new plain `GradientDescent`.
    ///
    /// # Arguments
    /// * `learning_rate` - The *length* of the steps taken on `update_params`.
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            momentum: 0.,
            weight_decay: 0.,
            velocity: None,
        }
    }

    pub fn with_momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }
}

impl Optimizer for GradientDescent {
    /// Updates the parameters according to the algorithm's learning rule, that is, making a step in
    /// the opposite direction of the accumulated velocity, with a length of `learning_rate`.
    fn update_params(&mut self, params: &mut [f64], grad: &[f64]) -> Result<()> {
        check_size("gradient", grad.len(), params.len())?;

        let Self {
            learning_rate: lr,
            momentum,
            weight_decay,
            ..
        } = *self;

        let velocity = self.velocity.get_or_insert_with(|| vec![0.; params.len()]);
        check_size("velocity", velocity.len(), params.len())?;

        for ((w, g), v) in params.iter_mut().zip(grad).zip(velocity.iter_mut()) {
            *v = momentum * *v + (g + weight_decay * *w);
            *w -= lr * *v;
        }

        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    fn reset(&mut self) {
        self.velocity = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_step_follows_the_gradient() {
        let mut gd = GradientDescent::new(0.1);
        let mut params = [1., -2.];

        gd.update_params(&mut params, &[10., -10.]).unwrap();
        assert_eq!(params, [0., -1.]);
    }

    #[test]
    fn momentum_accumulates_velocity() {
        let mut gd = GradientDescent::new(1.).with_momentum(0.5);
        let mut params = [0.];

        gd.update_params(&mut params, &[1.]).unwrap();
        gd.update_params(&mut params, &[1.]).unwrap();
        // v1 = 1, v2 = 1.5
        assert_eq!(params, [-2.5]);

        gd.reset();
        gd.update_params(&mut params, &[1.]).unwrap();
        assert_eq!(params, [-3.5]);
    }

    #[test]
    fn weight_decay_shrinks_towards_zero() {
        let mut gd = GradientDescent::new(0.5).with_weight_decay(1.);
        let mut params = [4.];

        gd.update_params(&mut params, &[0.]).unwrap();
        assert_eq!(params, [2.]);
    }

    #[test]
    fn mismatched_lengths_fail() {
        let mut gd = GradientDescent::new(0.1);
        assert!(gd.update_params(&mut [0.; 2], &[0.; 3]).is_err());
    }
}

use super::Optimizer;
use crate::{Result, error::check_size};

#[derive(Debug, Clone)]
struct Moments {
    m: Vec<f64>,
    v: Vec<f64>,
    step: i32,
}

impl Moments {
    fn zeros(n: usize) -> Self {
        Self {
            m: vec![0.; n],
            v: vec![0.; n],
            step: 0,
        }
    }
}

/// The Adam optimization algorithm.
///
/// At step `t`: `m = β1·m + (1-β1)·g`, `v = β2·v + (1-β2)·g²`, and
/// `p -= lr·m̂ / (√v̂ + ε)` with the bias corrected `m̂ = m / (1-β1^t)`, `v̂ = v / (1-β2^t)`.
/// A non zero `weight_decay` is folded into the gradient as an L2 penalty.
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    weight_decay: f64,
    moments: Option<Moments>,
}

impl Adam {
    /// Returns a new `Adam` with `β1 = 0.9`, `β2 = 0.999` and `ε = 1e-8`.
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.,
            moments: None,
        }
    }

    pub fn with_betas(mut self, beta1: f64, beta2: f64) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    /// The amount of updates since the last reset.
    pub fn step(&self) -> usize {
        self.moments.as_ref().map_or(0, |m| m.step as usize)
    }

    /// Runs one Adam update with `decay` used as the L2 coefficient of the gradient.
    fn adam_step(&mut self, params: &mut [f64], grad: &[f64], decay: f64) -> Result<()> {
        check_size("gradient", grad.len(), params.len())?;

        let Self {
            learning_rate: lr,
            beta1,
            beta2,
            eps,
            ..
        } = *self;

        let moments = self
            .moments
            .get_or_insert_with(|| Moments::zeros(params.len()));
        check_size("adam moments", moments.m.len(), params.len())?;

        moments.step += 1;
        let bc1_inv = 1. / (1. - beta1.powi(moments.step));
        let bc2_inv = 1. / (1. - beta2.powi(moments.step));

        let Moments { m, v, .. } = moments;
        for (((w, &g), m), v) in params.iter_mut().zip(grad).zip(m).zip(v) {
            let g = g + decay * *w;
            *m = beta1 * *m + (1. - beta1) * g;
            *v = beta2 * *v + (1. - beta2) * g * g;

            let m_hat = *m * bc1_inv;
            let v_hat = *v * bc2_inv;
            *w -= lr * m_hat / (v_hat.sqrt() + eps);
        }

        Ok(())
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, params: &mut [f64], grad: &[f64]) -> Result<()> {
        self.adam_step(params, grad, self.weight_decay)
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    fn reset(&mut self) {
        self.moments = None;
    }
}

/// Adam with decoupled weight decay: `p *= 1 - lr·weight_decay` before the Adam update, the
/// decay never going through the moments.
#[derive(Debug, Clone)]
pub struct AdamW {
    adam: Adam,
    weight_decay: f64,
}

impl AdamW {
    /// Returns a new `AdamW` with Adam's default betas and epsilon.
    pub fn new(learning_rate: f64, weight_decay: f64) -> Self {
        Self {
            adam: Adam::new(learning_rate),
            weight_decay,
        }
    }

    pub fn with_betas(mut self, beta1: f64, beta2: f64) -> Self {
        self.adam = self.adam.with_betas(beta1, beta2);
        self
    }

    pub fn with_eps(mut self, eps: f64) -> Self {
        self.adam = self.adam.with_eps(eps);
        self
    }

    pub fn step(&self) -> usize {
        self.adam.step()
    }
}

impl Optimizer for AdamW {
    fn update_params(&mut self, params: &mut [f64], grad: &[f64]) -> Result<()> {
        check_size("gradient", grad.len(), params.len())?;

        let shrink = 1. - self.adam.learning_rate * self.weight_decay;
        params.iter_mut().for_each(|w| *w *= shrink);
        self.adam.adam_step(params, grad, 0.)
    }

    fn learning_rate(&self) -> f64 {
        self.adam.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        self.adam.learning_rate = learning_rate;
    }

    fn reset(&mut self) {
        self.adam.reset();
    }
}

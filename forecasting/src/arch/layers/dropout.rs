use ndarray::{Array, ArrayD, Dimension};
use rand::{Rng, RngCore};

use crate::{MlErr, Result, error::check_shape};

#[derive(Debug, Clone)]
enum Cache {
    Identity,
    Mask(ArrayD<f64>),
}

/// Inverted dropout: in training mode every unit is dropped with probability `rate` and the kept
/// ones are scaled by `1 / (1 - rate)`, in evaluation mode it's the identity.
#[derive(Debug, Clone)]
pub struct Dropout {
    rate: f64,
    training: bool,
    cache: Option<Cache>,
}

impl Dropout {
    /// Creates a new `Dropout` in training mode.
    ///
    /// # Arguments
    /// * `rate` - The probability of dropping a unit, must be in `[0, 1)`.
    ///
    /// # Returns
    /// A new `Dropout` instance or an error if the rate is out of range.
    pub fn new(rate: f64) -> Result<Self> {
        if !(0. ..1.).contains(&rate) {
            return Err(MlErr::InvalidConfig(format!(
                "dropout rate must be in [0, 1), got {rate}"
            )));
        }

        Ok(Self {
            rate,
            training: true,
            cache: None,
        })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    /// Makes a forward pass through the layer.
    ///
    /// # Arguments
    /// * `x` - The input.
    /// * `rng` - The source of randomness for the mask, only required in training mode.
    ///
    /// # Returns
    /// The masked input or an error if in training mode without a random number generator.
    pub fn forward<D: Dimension>(
        &mut self,
        x: Array<f64, D>,
        rng: Option<&mut dyn RngCore>,
    ) -> Result<Array<f64, D>> {
        if !self.training || self.rate == 0. {
            self.cache = Some(Cache::Identity);
            return Ok(x);
        }

        let rng = rng.ok_or(MlErr::MissingRng { layer: "dropout" })?;
        let keep = 1. - self.rate;
        let scale = 1. / keep;
        let mask = x.mapv(|_| if rng.random::<f64>() < keep { scale } else { 0. });

        let a = x * &mask;
        self.cache = Some(Cache::Mask(mask.into_dyn()));
        Ok(a)
    }

    pub fn backward<D: Dimension>(&mut self, d: Array<f64, D>) -> Result<Array<f64, D>> {
        match self.cache.take() {
            None => Err(MlErr::MissingCache { layer: "dropout" }),
            Some(Cache::Identity) => Ok(d),
            Some(Cache::Mask(mask)) => {
                check_shape("dropout gradient", d.shape(), mask.shape())?;
                let mask = mask.into_dimensionality::<D>()?;
                Ok(d * &mask)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array1, Array2};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn invalid_rates_are_rejected() {
        assert!(Dropout::new(1.).is_err());
        assert!(Dropout::new(-0.1).is_err());
        assert!(Dropout::new(0.).is_ok());
    }

    #[test]
    fn evaluation_mode_is_the_identity() {
        let mut dropout = Dropout::new(0.5).unwrap();
        dropout.set_training(false);

        let x = Array1::linspace(0., 1., 10);
        let a = dropout.forward(x.clone(), None).unwrap();
        assert_eq!(a, x);
        assert_eq!(dropout.backward(x.clone()).unwrap(), x);
    }

    #[test]
    fn training_mode_requires_a_rng() {
        let mut dropout = Dropout::new(0.5).unwrap();
        assert!(dropout.forward(Array1::<f64>::ones(3), None).is_err());
    }

    #[test]
    fn backward_reapplies_the_same_mask() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut dropout = Dropout::new(0.5).unwrap();

        let a = dropout
            .forward(Array2::<f64>::ones((8, 8)), Some(&mut rng))
            .unwrap();
        let d = dropout.backward(Array2::<f64>::ones((8, 8))).unwrap();

        assert_eq!(a, d);
        assert!(a.iter().all(|&v| v == 0. || v == 2.));
        assert!(a.iter().any(|&v| v == 0.));
    }

    #[test]
    fn kept_units_preserve_the_expectation() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut dropout = Dropout::new(0.3).unwrap();

        let a = dropout
            .forward(Array1::<f64>::ones(50_000), Some(&mut rng))
            .unwrap();
        let mean = a.mean().unwrap();
        assert!((mean - 1.).abs() < 0.02, "mean {mean}");
    }
}

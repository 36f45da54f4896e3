use ndarray::{Array, ArrayD, Dimension};

use crate::{MlErr, Result, error::check_shape};

/// The rectified linear activation, `max(0, x)`.
#[derive(Debug, Clone, Default)]
pub struct Relu {
    mask: Option<ArrayD<bool>>,
}

impl Relu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward<D: Dimension>(&mut self, x: Array<f64, D>) -> Array<f64, D> {
        let mask = x.mapv(|x| x > 0.);
        let a = x.mapv_into(|x| if x > 0. { x } else { 0. });

        self.mask = Some(mask.into_dyn());
        a
    }

    pub fn backward<D: Dimension>(&mut self, mut d: Array<f64, D>) -> Result<Array<f64, D>> {
        let mask = self.mask.take().ok_or(MlErr::MissingCache { layer: "relu" })?;
        check_shape("relu gradient", d.shape(), mask.shape())?;

        let mask = mask.into_dimensionality::<D>()?;
        d.zip_mut_with(&mask, |d, &keep| {
            if !keep {
                *d = 0.;
            }
        });

        Ok(d)
    }
}

use ndarray::{Array, ArrayD, Dimension};

use crate::{MlErr, Result, error::check_shape};

/// Above this value `ln(1 + e^x)` equals `x` in double precision.
const LINEAR_THRESHOLD: f64 = 20.;

/// The softplus activation, a smooth and strictly positive version of the ReLU.
#[derive(Debug, Clone, Default)]
pub struct Softplus {
    z: Option<ArrayD<f64>>,
}

impl Softplus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn f(z: f64) -> f64 {
        if z > LINEAR_THRESHOLD {
            z
        } else {
            z.exp().ln_1p()
        }
    }

    /// The derivative of softplus, the logistic sigmoid.
    pub fn df(z: f64) -> f64 {
        if z >= 0. {
            1. / (1. + (-z).exp())
        } else {
            let e = z.exp();
            e / (1. + e)
        }
    }

    pub fn forward<D: Dimension>(&mut self, z: Array<f64, D>) -> Array<f64, D> {
        let a = z.mapv(Self::f);
        self.z = Some(z.into_dyn());
        a
    }

    pub fn backward<D: Dimension>(&mut self, mut d: Array<f64, D>) -> Result<Array<f64, D>> {
        let z = self.z.take().ok_or(MlErr::MissingCache { layer: "softplus" })?;
        check_shape("softplus gradient", d.shape(), z.shape())?;

        let z = z.into_dimensionality::<D>()?;
        d.zip_mut_with(&z, |d, &z| *d *= Self::df(z));
        Ok(d)
    }
}

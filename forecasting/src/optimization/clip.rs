use serde::{Deserialize, Serialize};

use crate::{MlErr, Result};

/// The norm used for global gradient clipping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipNorm {
    L2,
    LInf,
}

/// A gradient clipping rule, applied to the whole gradient before the optimizer step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GradClip {
    /// Clamps every element to `[-c, c]`.
    Value(f64),
    /// Rescales the whole gradient by a single coefficient so its global norm is at most
    /// `max_norm`.
    Norm { max_norm: f64, norm: ClipNorm },
}

impl GradClip {
    /// Clamps every element to `[-max_value, max_value]`, `max_value` being finite and positive.
    pub fn value(max_value: f64) -> Result<Self> {
        let clip = GradClip::Value(max_value);
        clip.validate()?;
        Ok(clip)
    }

    /// Rescales to a global norm of at most `max_norm`, which must be finite and positive.
    pub fn norm(max_norm: f64, norm: ClipNorm) -> Result<Self> {
        let clip = GradClip::Norm { max_norm, norm };
        clip.validate()?;
        Ok(clip)
    }

    fn validate(&self) -> Result<()> {
        let (name, threshold) = match *self {
            GradClip::Value(c) => ("max_value", c),
            GradClip::Norm { max_norm, .. } => ("max_norm", max_norm),
        };
        if !threshold.is_finite() || threshold <= 0. {
            return Err(MlErr::InvalidConfig(format!(
                "clipping {name} must be finite and positive, got {threshold}"
            )));
        }

        Ok(())
    }

    /// Clips `grad` in place.
    ///
    /// # Returns
    /// The norm of the gradient before clipping, the largest absolute element for value
    /// clipping, or an `InvalidConfig` error if the threshold isn't finite and positive.
    pub fn apply(&self, grad: &mut [f64]) -> Result<f64> {
        self.validate()?;
        match *self {
            GradClip::Value(c) => {
                let max = norm(grad, ClipNorm::LInf);
                grad.iter_mut().for_each(|g| *g = g.clamp(-c, c));
                Ok(max)
            }
            GradClip::Norm { max_norm, norm: kind } => {
                let total = norm(grad, kind);
                if total > max_norm && total > 0. {
                    let coef = max_norm / total;
                    grad.iter_mut().for_each(|g| *g *= coef);
                }
                Ok(total)
            }
        }
    }
}

/// The global norm of `grad`.
pub fn norm(grad: &[f64], kind: ClipNorm) -> f64 {
    match kind {
        ClipNorm::L2 => grad.iter().map(|g| g * g).sum::<f64>().sqrt(),
        ClipNorm::LInf => grad.iter().fold(0., |acc, g| acc.max(g.abs())),
    }
}

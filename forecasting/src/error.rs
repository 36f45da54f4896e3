use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use ndarray::ShapeError;

/// The result type used in the entire forecasting module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The forecasting module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    ShapeMismatch {
        what: &'static str,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    MissingCache {
        layer: &'static str,
    },
    MissingRng {
        layer: &'static str,
    },
    InvalidConfig(String),
    InvalidInput(String),
    GradientCheck {
        index: usize,
        analytic: f64,
        numerical: f64,
        max_abs_diff: f64,
    },
    Diverged {
        epoch: usize,
        loss: f64,
    },
    Checkpoint(String),
    Shape(ShapeError),
    Io(io::Error),
    Json(serde_json::Error),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch for {what}, got {got} and expected {expected}"
            ),
            MlErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a shape mismatch for {what}, got {got:?} and expected {expected:?}"
            ),
            MlErr::MissingCache { layer } => write!(
                f,
                "Called backward on the {layer} layer without a matching forward pass"
            ),
            MlErr::MissingRng { layer } => write!(
                f,
                "The {layer} layer is in training mode but no random number generator was given"
            ),
            MlErr::InvalidConfig(msg) => write!(f, "Invalid config: {msg}"),
            MlErr::InvalidInput(msg) => write!(f, "Invalid input: {msg}"),
            MlErr::GradientCheck {
                index,
                analytic,
                numerical,
                max_abs_diff,
            } => write!(
                f,
                "Gradient check failed at parameter {index}: analytic {analytic}, numerical {numerical}, max abs diff {max_abs_diff}"
            ),
            MlErr::Diverged { epoch, loss } => {
                write!(f, "Training diverged at epoch {epoch}, loss is {loss}")
            }
            MlErr::Checkpoint(msg) => write!(f, "Checkpoint error: {msg}"),
            MlErr::Shape(e) => write!(f, "Shape error: {e}"),
            MlErr::Io(e) => write!(f, "IO error: {e}"),
            MlErr::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Shape(e) => Some(e),
            MlErr::Io(e) => Some(e),
            MlErr::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<io::Error> for MlErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for MlErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<rand_distr::NormalError> for MlErr {
    fn from(value: rand_distr::NormalError) -> Self {
        Self::InvalidConfig(value.to_string())
    }
}

/// Checks that two shapes are equal.
///
/// # Arguments
/// * `what` - A short description of the checked value.
/// * `got` - The observed shape.
/// * `expected` - The expected shape.
///
/// # Returns
/// A `ShapeMismatch` error if the shapes differ.
pub(crate) fn check_shape(what: &'static str, got: &[usize], expected: &[usize]) -> Result<()> {
    if got != expected {
        return Err(MlErr::ShapeMismatch {
            what,
            got: got.to_vec(),
            expected: expected.to_vec(),
        });
    }

    Ok(())
}

/// Checks that two lengths are equal.
pub(crate) fn check_size(what: &'static str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(MlErr::SizeMismatch {
            what,
            got,
            expected,
        });
    }

    Ok(())
}

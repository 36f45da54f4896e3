//! A probabilistic demand forecasting engine: a temporal convolutional network predicting the
//! mean and dispersion of a Negative Binomial distribution per step, trained by minimizing its
//! negative log-likelihood with manually derived gradients.

pub mod arch;
pub mod checkpoint;
pub mod dataset;
pub mod distribution;
pub mod error;
pub mod features;
pub mod forecast;
pub mod gradcheck;
pub mod optimization;
pub mod special;
pub mod specs;
pub mod training;

pub use arch::{Model, NbOutput, TcnConfig, TemporalConvNet};
pub use checkpoint::Checkpoint;
pub use dataset::{Batch, Dataset, Targets};
pub use distribution::NegativeBinomial;
pub use error::{MlErr, Result};
pub use forecast::Forecast;
pub use gradcheck::{GradCheckReport, GradientChecker};
pub use training::{ModelTrainer, TrainerBuilder};

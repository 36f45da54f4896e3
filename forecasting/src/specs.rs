//! Serializable specifications resolved into concrete components by the `TrainerBuilder`.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::optimization::ClipNorm;

fn default_dropout() -> f64 {
    0.
}

fn default_horizon() -> usize {
    1
}

/// The specification for the `Model` trait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSpec {
    Tcn {
        input_size: NonZeroUsize,
        hidden_size: NonZeroUsize,
        kernel_size: NonZeroUsize,
        /// Explicit dilations, one per block, taking precedence over `levels`.
        #[serde(default)]
        dilations: Option<Vec<usize>>,
        /// The amount of doubling dilation blocks, used when `dilations` is not given.
        #[serde(default)]
        levels: Option<NonZeroUsize>,
        #[serde(default = "default_dropout")]
        dropout: f64,
        seq_len: NonZeroUsize,
        #[serde(default = "default_horizon")]
        horizon: usize,
    },
}

/// The specification for the `Optimizer` trait.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerSpec {
    Adam {
        learning_rate: f64,
        beta1: f64,
        beta2: f64,
        epsilon: f64,
        #[serde(default)]
        weight_decay: f64,
    },
    AdamW {
        learning_rate: f64,
        beta1: f64,
        beta2: f64,
        epsilon: f64,
        weight_decay: f64,
    },
    GradientDescent {
        learning_rate: f64,
    },
    GradientDescentWithMomentum {
        learning_rate: f64,
        momentum: f64,
        #[serde(default)]
        weight_decay: f64,
    },
}

impl OptimizerSpec {
    pub fn learning_rate(&self) -> f64 {
        match *self {
            OptimizerSpec::Adam { learning_rate, .. }
            | OptimizerSpec::AdamW { learning_rate, .. }
            | OptimizerSpec::GradientDescent { learning_rate }
            | OptimizerSpec::GradientDescentWithMomentum { learning_rate, .. } => learning_rate,
        }
    }
}

/// The specification for the `LossFn` trait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossFnSpec {
    #[default]
    NegBinomialNll,
}

/// The specification for the `LrSchedule` enum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleSpec {
    #[default]
    Constant,
    Step {
        step_size: NonZeroUsize,
        gamma: f64,
    },
    Exponential {
        gamma: f64,
    },
    Cosine {
        t_max: NonZeroUsize,
        min_lr: f64,
    },
    Warmup {
        warmup_epochs: NonZeroUsize,
    },
}

/// The specification for the `GradClip` enum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipSpec {
    Value { max_value: f64 },
    Norm { max_norm: f64, norm: ClipNorm },
}

/// The specification for the `EarlyStopping` struct.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EarlyStoppingSpec {
    pub patience: NonZeroUsize,
    #[serde(default)]
    pub min_delta: f64,
    #[serde(default)]
    pub restore_best: bool,
}

/// The specification for the `ModelTrainer` struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerSpec {
    pub model: ModelSpec,
    pub optimizer: OptimizerSpec,
    #[serde(default)]
    pub loss: LossFnSpec,
    #[serde(default)]
    pub schedule: ScheduleSpec,
    #[serde(default)]
    pub clip: Option<ClipSpec>,
    #[serde(default)]
    pub early_stopping: Option<EarlyStoppingSpec>,
    pub epochs: NonZeroUsize,
    pub batch_size: NonZeroUsize,
    pub seed: Option<u64>,
}

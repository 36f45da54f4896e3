use rand::{SeedableRng, rngs::StdRng};

use super::{EarlyStopping, ModelTrainer};
use crate::{
    Result,
    arch::{TcnConfig, TemporalConvNet, doubling_dilations, loss::NegBinomialNll},
    optimization::{Adam, AdamW, GradClip, GradientDescent, LrSchedule, Optimizer},
    specs::{
        ClipSpec, EarlyStoppingSpec, LossFnSpec, ModelSpec, OptimizerSpec, ScheduleSpec,
        TrainerSpec,
    },
};

/// The trainer built from a `TrainerSpec`.
pub type ForecastTrainer =
    ModelTrainer<TemporalConvNet, Box<dyn Optimizer + Send>, NegBinomialNll, StdRng>;

/// Builds `ModelTrainer`s given a specification.
#[derive(Default)]
pub struct TrainerBuilder;

impl TrainerBuilder {
    /// Creates a new `TrainerBuilder`.
    pub fn new() -> Self {
        Self
    }

    /// Builds a new `ModelTrainer` following a spec.
    ///
    /// # Arguments
    /// * `spec` - The specification for the trainer.
    ///
    /// # Returns
    /// The trainer, with a freshly initialized model, or an error if the spec is invalid.
    pub fn build(&self, spec: &TrainerSpec) -> Result<ForecastTrainer> {
        let mut rng = self.generate_rng(spec.seed);
        let config = self.resolve_model(&spec.model);
        let model = TemporalConvNet::new(config, &mut rng)?;
        let optimizer = self.resolve_optimizer(spec.optimizer);
        let loss_fn = self.resolve_loss(spec.loss);

        let mut trainer = ModelTrainer::new(
            model,
            optimizer,
            loss_fn,
            spec.epochs,
            spec.batch_size,
            rng,
        )
        .with_schedule(self.resolve_schedule(spec.schedule));

        if let Some(clip) = spec.clip {
            trainer = trainer.with_clip(self.resolve_clip(clip)?);
        }
        if let Some(early_stopping) = spec.early_stopping {
            trainer = trainer.with_early_stopping(self.resolve_early_stopping(early_stopping));
        }

        Ok(trainer)
    }

    /// Resolves the network hyperparameters, explicit dilations taking precedence over levels and
    /// a single block being used when neither is given.
    pub fn resolve_model(&self, spec: &ModelSpec) -> TcnConfig {
        match spec {
            ModelSpec::Tcn {
                input_size,
                hidden_size,
                kernel_size,
                dilations,
                levels,
                dropout,
                seq_len,
                horizon,
            } => TcnConfig {
                input_size: input_size.get(),
                hidden_size: hidden_size.get(),
                kernel_size: kernel_size.get(),
                dilations: match (dilations, levels) {
                    (Some(dilations), _) => dilations.clone(),
                    (None, Some(levels)) => doubling_dilations(*levels),
                    (None, None) => vec![1],
                },
                dropout: *dropout,
                seq_len: seq_len.get(),
                horizon: *horizon,
            },
        }
    }

    fn resolve_optimizer(&self, spec: OptimizerSpec) -> Box<dyn Optimizer + Send> {
        match spec {
            OptimizerSpec::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
                weight_decay,
            } => Box::new(
                Adam::new(learning_rate)
                    .with_betas(beta1, beta2)
                    .with_eps(epsilon)
                    .with_weight_decay(weight_decay),
            ),
            OptimizerSpec::AdamW {
                learning_rate,
                beta1,
                beta2,
                epsilon,
                weight_decay,
            } => Box::new(
                AdamW::new(learning_rate, weight_decay)
                    .with_betas(beta1, beta2)
                    .with_eps(epsilon),
            ),
            OptimizerSpec::GradientDescent { learning_rate } => {
                Box::new(GradientDescent::new(learning_rate))
            }
            OptimizerSpec::GradientDescentWithMomentum {
                learning_rate,
                momentum,
                weight_decay,
            } => Box::new(
                GradientDescent::new(learning_rate)
                    .with_momentum(momentum)
                    .with_weight_decay(weight_decay),
            ),
        }
    }

    fn resolve_loss(&self, spec: LossFnSpec) -> NegBinomialNll {
        match spec {
            LossFnSpec::NegBinomialNll => NegBinomialNll::new(),
        }
    }

    fn resolve_schedule(&self, spec: ScheduleSpec) -> LrSchedule {
        match spec {
            ScheduleSpec::Constant => LrSchedule::Constant,
            ScheduleSpec::Step { step_size, gamma } => LrSchedule::Step {
                step_size: step_size.get(),
                gamma,
            },
            ScheduleSpec::Exponential { gamma } => LrSchedule::Exponential { gamma },
            ScheduleSpec::Cosine { t_max, min_lr } => LrSchedule::Cosine {
                t_max: t_max.get(),
                min_lr,
            },
            ScheduleSpec::Warmup { warmup_epochs } => LrSchedule::Warmup {
                warmup_epochs: warmup_epochs.get(),
            },
        }
    }

    fn resolve_clip(&self, spec: ClipSpec) -> Result<GradClip> {
        match spec {
            ClipSpec::Value { max_value } => GradClip::value(max_value),
            ClipSpec::Norm { max_norm, norm } => GradClip::norm(max_norm, norm),
        }
    }

    fn resolve_early_stopping(&self, spec: EarlyStoppingSpec) -> EarlyStopping {
        EarlyStopping::new(spec.patience)
            .with_min_delta(spec.min_delta)
            .with_restore_best(spec.restore_best)
    }

    fn generate_rng(&self, seed: Option<u64>) -> StdRng {
        match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}

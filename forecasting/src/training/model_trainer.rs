use std::num::NonZeroUsize;

use log::{debug, info, warn};
use ndarray::{Array1, Axis};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use super::Metrics;
use crate::{
    MlErr, Result,
    arch::{Model, loss::LossFn},
    dataset::{Batch, Dataset, Targets},
    forecast::Forecast,
    optimization::{GradClip, LrSchedule, LrScheduler, Optimizer},
};

/// The summary of a single training epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub valid_loss: Option<f64>,
    pub learning_rate: f64,
}

/// Stops the training once the validation loss hasn't improved by at least `min_delta` for
/// `patience` epochs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EarlyStopping {
    pub patience: NonZeroUsize,
    pub min_delta: f64,
    /// Whether to restore the parameters of the best epoch when stopping.
    pub restore_best: bool,
}

impl EarlyStopping {
    pub fn new(patience: NonZeroUsize) -> Self {
        Self {
            patience,
            min_delta: 0.,
            restore_best: false,
        }
    }

    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta;
        self
    }

    pub fn with_restore_best(mut self, restore_best: bool) -> Self {
        self.restore_best = restore_best;
        self
    }
}

#[derive(Debug, Clone)]
struct Best {
    loss: f64,
    params: Vec<f64>,
    wait: usize,
}

/// A model `Trainer`. Contains the relevant components needed for training a model,
/// including the model itself.
pub struct ModelTrainer<M, O, L, R>
where
    M: Model,
    O: Optimizer,
    L: LossFn,
    R: Rng,
{
    model: M,
    optimizer: O,
    loss_fn: L,
    scheduler: LrScheduler,
    clip: Option<GradClip>,
    early_stopping: Option<EarlyStopping>,

    epochs: NonZeroUsize,
    batch_size: NonZeroUsize,
    rng: R,
    history: Vec<EpochRecord>,
}

impl<M, O, L, R> ModelTrainer<M, O, L, R>
where
    M: Model,
    O: Optimizer,
    L: LossFn,
    R: Rng,
{
    /// Returns a new `ModelTrainer` with a constant learning rate, no clipping and no early
    /// stopping.
    ///
    /// # Arguments
    /// * `model` - The model that will be trained.
    /// * `optimizer` - The optimizer, its learning rate is used as the base of the schedule.
    /// * `loss_fn` - The loss function used to measure the difference between a model's output
    ///   and the expected one.
    /// * `epochs` - The maximum amount of epochs to run per `fit` call.
    /// * `batch_size` - The amount of examples per optimizer step.
    /// * `rng` - A random number generator, used for shuffling and dropout.
    pub fn new(
        model: M,
        optimizer: O,
        loss_fn: L,
        epochs: NonZeroUsize,
        batch_size: NonZeroUsize,
        rng: R,
    ) -> Self {
        let scheduler = LrScheduler::new(optimizer.learning_rate(), LrSchedule::Constant);

        Self {
            model,
            optimizer,
            loss_fn,
            scheduler,
            clip: None,
            early_stopping: None,
            epochs,
            batch_size,
            rng,
            history: Vec::new(),
        }
    }

    pub fn with_schedule(mut self, schedule: LrSchedule) -> Self {
        self.scheduler = LrScheduler::new(self.scheduler.base_lr(), schedule);
        self
    }

    pub fn with_clip(mut self, clip: GradClip) -> Self {
        self.clip = Some(clip);
        self
    }

    pub fn with_early_stopping(mut self, early_stopping: EarlyStopping) -> Self {
        self.early_stopping = Some(early_stopping);
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    /// Discards the optimizer's accumulated state, such as moments or velocities, so the next
    /// step behaves like the first one of a fresh optimizer.
    pub fn reset_optimizer(&mut self) {
        self.optimizer.reset();
    }

    /// Every epoch run so far, in order.
    pub fn history(&self) -> &[EpochRecord] {
        &self.history
    }

    /// Trains the model for up to `epochs` epochs.
    ///
    /// Every epoch sets the scheduled learning rate, shuffles the training set and takes one
    /// optimizer step per batch. When a validation set is given, its loss is recorded and drives
    /// the early stopping.
    ///
    /// # Arguments
    /// * `train` - The training set, it gets shuffled.
    /// * `valid` - An optional validation set.
    ///
    /// # Returns
    /// The records of the epochs run by this call or a `Diverged` error if the training loss
    /// stopped being finite.
    pub fn fit(&mut self, train: &mut Dataset, valid: Option<&Dataset>) -> Result<&[EpochRecord]> {
        if train.is_empty() {
            return Err(MlErr::InvalidInput("the training set is empty".into()));
        }

        let start = self.history.len();
        let mut best: Option<Best> = None;
        self.scheduler.reset();

        for epoch in start..start + self.epochs.get() {
            let learning_rate = self.scheduler.current();
            self.optimizer.set_learning_rate(learning_rate);

            train.shuffle(&mut self.rng);
            let mut total = 0.;
            let mut batches = 0;
            for batch in train.batches(self.batch_size) {
                let loss = self.train_step(&batch)?;
                debug!(epoch = epoch, batch = batches, loss = loss; "trained batch");
                total += loss;
                batches += 1;
            }

            let train_loss = total / batches as f64;
            if !train_loss.is_finite() {
                warn!(epoch = epoch, loss = train_loss; "training diverged");
                return Err(MlErr::Diverged {
                    epoch,
                    loss: train_loss,
                });
            }

            let valid_loss = valid.map(|valid| self.evaluate(valid)).transpose()?;
            self.history.push(EpochRecord {
                epoch,
                train_loss,
                valid_loss,
                learning_rate,
            });
            info!(
                epoch = epoch,
                train_loss = train_loss,
                valid_loss = valid_loss.unwrap_or(f64::NAN),
                learning_rate = learning_rate;
                "finished epoch"
            );
            self.scheduler.advance();

            if let (Some(stopping), Some(loss)) = (self.early_stopping, valid_loss)
                && self.should_stop(stopping, loss, &mut best)
            {
                warn!(epoch = epoch, patience = stopping.patience.get(); "stopping early");
                if stopping.restore_best
                    && let Some(best) = &best
                {
                    info!(valid_loss = best.loss; "restoring the best parameters");
                    self.model.load_params(&best.params)?;
                }
                break;
            }
        }

        Ok(&self.history[start..])
    }

    fn should_stop(&self, stopping: EarlyStopping, loss: f64, best: &mut Option<Best>) -> bool {
        match best {
            Some(best) if loss.is_nan() || loss >= best.loss - stopping.min_delta => {
                best.wait += 1;
                best.wait >= stopping.patience.get()
            }
            None if loss.is_nan() => false,
            _ => {
                *best = Some(Best {
                    loss,
                    params: self.model.params().to_vec(),
                    wait: 0,
                });
                false
            }
        }
    }

    /// Takes a single optimizer step on a batch: forward, loss, backward, clip and update.
    ///
    /// # Returns
    /// The loss of the batch before the update.
    pub fn train_step(&mut self, batch: &Batch) -> Result<f64> {
        self.model.set_training(true);
        let rng: &mut dyn RngCore = &mut self.rng;

        let loss = match &batch.y {
            Targets::Last(y) => {
                let out = self.model.forward(batch.x.view(), Some(rng))?;
                let (mean, dispersion) = (out.mean.view(), out.dispersion.view());

                let loss = self.loss_fn.loss(mean, dispersion, y.view())?;
                let (d_mean, d_dispersion) = self.loss_fn.loss_prime(mean, dispersion, y.view())?;
                self.model.backward(d_mean.view(), d_dispersion.view())?;
                loss
            }
            Targets::Sequence(y) => {
                let y = y.view().insert_axis(Axis(2));
                let out = self.model.forward_sequence(batch.x.view(), Some(rng))?;
                let (mean, dispersion) = (out.mean.view(), out.dispersion.view());

                let loss = self.loss_fn.loss(mean, dispersion, y)?;
                let (d_mean, d_dispersion) = self.loss_fn.loss_prime(mean, dispersion, y)?;
                self.model
                    .backward_sequence(d_mean.view(), d_dispersion.view())?;
                loss
            }
        };

        let (params, grad) = self.model.params_and_grad_mut();
        if let Some(clip) = &self.clip {
            let norm = clip.apply(grad)?;
            debug!(norm = norm; "clipped gradient");
        }
        self.optimizer.update_params(params, grad)?;

        Ok(loss)
    }

    /// Computes the loss over a whole dataset in evaluation mode, without updating anything.
    pub fn evaluate(&mut self, data: &Dataset) -> Result<f64> {
        let Batch { x, y } = data.full();
        self.model.set_training(false);

        let loss = match &y {
            Targets::Last(y) => self
                .model
                .forward(x.view(), None)
                .and_then(|out| {
                    self.loss_fn
                        .loss(out.mean.view(), out.dispersion.view(), y.view())
                }),
            Targets::Sequence(y) => self
                .model
                .forward_sequence(x.view(), None)
                .and_then(|out| {
                    self.loss_fn.loss(
                        out.mean.view(),
                        out.dispersion.view(),
                        y.view().insert_axis(Axis(2)),
                    )
                }),
        };

        self.model.set_training(true);
        loss
    }

    /// Predicts the distribution of every example in evaluation mode.
    ///
    /// Sequence targets get one forecast per timestep, in row major order.
    pub fn forecast(&mut self, data: &Dataset) -> Result<Vec<Forecast>> {
        self.model.set_training(false);
        let x = data.x();

        let out = match data.y() {
            Targets::Last(_) => self.model.forward(x, None).map(|out| (out.mean, out.dispersion)),
            Targets::Sequence(_) => self.model.forward_sequence(x, None).map(|out| {
                (
                    Array1::from_iter(out.mean),
                    Array1::from_iter(out.dispersion),
                )
            }),
        };

        self.model.set_training(true);
        let (mean, dispersion) = out?;
        Ok(mean
            .iter()
            .zip(&dispersion)
            .map(|(&mean, &dispersion)| Forecast::new(mean, dispersion))
            .collect())
    }

    /// Scores the model's forecasts on a dataset.
    pub fn metrics(&mut self, data: &Dataset, level: f64) -> Result<Metrics> {
        let forecasts = self.forecast(data)?;
        let y: Vec<f64> = match data.y() {
            Targets::Last(y) => y.to_vec(),
            Targets::Sequence(y) => y.iter().copied().collect(),
        };

        Metrics::evaluate(&forecasts, &y, level)
    }
}

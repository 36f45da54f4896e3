use std::num::NonZeroUsize;

use ndarray::prelude::*;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use super::{
    Model, NbOutput,
    blocks::{PositiveHead, ResidualBlock},
    params::{FrontIter, ParamBuffer, ParamInfo, layout},
};
use crate::{MlErr, Result, error::check_shape, forecast::Forecast};

/// The hyperparameters of a `TemporalConvNet`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcnConfig {
    /// The amount of features per timestep.
    pub input_size: usize,
    pub hidden_size: usize,
    pub kernel_size: usize,
    /// One residual block per dilation.
    pub dilations: Vec<usize>,
    pub dropout: f64,
    /// The length of the input windows.
    pub seq_len: usize,
    /// How many steps after the end of a window the forecast target is.
    pub horizon: usize,
}

impl TcnConfig {
    /// Creates a new `TcnConfig` with `levels` blocks of doubling dilation (1, 2, 4, ...), no
    /// dropout and a horizon of one step.
    pub fn new(
        input_size: usize,
        hidden_size: usize,
        kernel_size: usize,
        levels: NonZeroUsize,
        seq_len: usize,
    ) -> Self {
        Self {
            input_size,
            hidden_size,
            kernel_size,
            dilations: doubling_dilations(levels),
            dropout: 0.,
            seq_len,
            horizon: 1,
        }
    }

    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn with_horizon(mut self, horizon: usize) -> Self {
        self.horizon = horizon;
        self
    }

    pub fn with_dilations(mut self, dilations: Vec<usize>) -> Self {
        self.dilations = dilations;
        self
    }

    /// The number of input timesteps that can influence a single output timestep,
    /// `1 + Σ (kernel_size - 1) · dilation`.
    pub fn receptive_field(&self) -> usize {
        1 + self
            .dilations
            .iter()
            .map(|d| self.kernel_size.saturating_sub(1) * d)
            .sum::<usize>()
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("input_size", self.input_size),
            ("hidden_size", self.hidden_size),
            ("kernel_size", self.kernel_size),
            ("seq_len", self.seq_len),
            ("horizon", self.horizon),
        ];

        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(MlErr::InvalidConfig(format!("{name} must be positive")));
        }

        if self.dilations.is_empty() || self.dilations.contains(&0) {
            return Err(MlErr::InvalidConfig(format!(
                "dilations must be non empty and positive, got {:?}",
                self.dilations
            )));
        }

        Ok(())
    }
}

/// The dilations `1, 2, 4, ..., 2^(levels - 1)`.
pub fn doubling_dilations(levels: NonZeroUsize) -> Vec<usize> {
    (0..levels.get()).map(|i| 1 << i).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Last { batch: usize, time: usize },
    Sequence { batch: usize, time: usize },
}

/// A temporal convolutional network predicting Negative Binomial parameters.
///
/// A stack of causal residual blocks (the first one mapping `input_size` to `hidden_size` and the
/// rest `hidden_size` to `hidden_size`) encodes the sequence, then two independent positive heads
/// map the hidden state to the mean and the dispersion.
///
/// Every parameter lives in a single flat buffer, laid out as the blocks in order followed by the
/// mean head and the dispersion head.
#[derive(Debug, Clone)]
pub struct TemporalConvNet {
    config: TcnConfig,
    blocks: Vec<ResidualBlock>,
    mean_head: PositiveHead,
    dispersion_head: PositiveHead,
    params: ParamBuffer,
    layout: Vec<ParamInfo>,
    training: bool,
    pending: Option<Pending>,
}

impl TemporalConvNet {
    /// Creates a new `TemporalConvNet` with initialized parameters.
    ///
    /// # Arguments
    /// * `config` - The hyperparameters of the network.
    /// * `rng` - The random number generator used for the initialization.
    ///
    /// # Returns
    /// A new `TemporalConvNet` in training mode or an error if the config is invalid.
    pub fn new<R: Rng + ?Sized>(config: TcnConfig, rng: &mut R) -> Result<Self> {
        let mut net = Self::uninit(config)?;

        let mut rest = net.params.params_mut();
        for block in &net.blocks {
            let (chunk, tail) = std::mem::take(&mut rest).split_at_mut(block.size());
            block.init(chunk, rng)?;
            rest = tail;
        }

        let (mean, dispersion) = rest.split_at_mut(net.mean_head.size());
        net.mean_head.init(mean, rng)?;
        net.dispersion_head.init(dispersion, rng)?;
        Ok(net)
    }

    /// Creates a new `TemporalConvNet` with every parameter set to zero.
    pub(crate) fn uninit(config: TcnConfig) -> Result<Self> {
        config.validate()?;

        let mut blocks = Vec::with_capacity(config.dilations.len());
        let mut in_channels = config.input_size;
        for &dilation in &config.dilations {
            blocks.push(ResidualBlock::new(
                in_channels,
                config.hidden_size,
                config.kernel_size,
                dilation,
                config.dropout,
            )?);
            in_channels = config.hidden_size;
        }

        let mean_head = PositiveHead::new(config.hidden_size);
        let dispersion_head = PositiveHead::new(config.hidden_size);

        let mut layout_ = Vec::new();
        let mut offset = 0;
        for (i, block) in blocks.iter().enumerate() {
            offset = block.layout(&format!("blocks.{i}"), offset, &mut layout_);
        }
        offset = layout("mean_head", &mean_head.param_shapes(), offset, &mut layout_);
        offset = layout(
            "dispersion_head",
            &dispersion_head.param_shapes(),
            offset,
            &mut layout_,
        );

        Ok(Self {
            config,
            blocks,
            mean_head,
            dispersion_head,
            params: ParamBuffer::zeros(offset),
            layout: layout_,
            training: true,
            pending: None,
        })
    }

    pub fn config(&self) -> &TcnConfig {
        &self.config
    }

    /// The number of input timesteps that can influence a single output timestep.
    pub fn receptive_field(&self) -> usize {
        1 + self
            .blocks
            .iter()
            .map(ResidualBlock::receptive_field)
            .sum::<usize>()
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// The name, shape and position of every parameter, in buffer order.
    pub fn named_parameters(&self) -> &[ParamInfo] {
        &self.layout
    }

    /// Named views of every parameter.
    pub fn parameters(&self) -> Result<Vec<(&str, ArrayViewD<'_, f64>)>> {
        self.params.views(&self.layout)
    }

    /// Named views of the gradient of every parameter, as written by the last backward pass.
    pub fn gradients(&self) -> Result<Vec<(&str, ArrayViewD<'_, f64>)>> {
        self.params.grad_views(&self.layout)
    }

    /// Makes an evaluation mode forward pass, restoring the previous mode afterwards.
    ///
    /// # Arguments
    /// * `x` - The `(batch, time, input_size)` input.
    ///
    /// # Returns
    /// One forecast per sequence in the batch.
    pub fn predict(&mut self, x: ArrayView3<f64>) -> Result<Vec<Forecast>> {
        let training = self.training;
        self.set_training(false);
        let out = self.forward(x, None);
        self.set_training(training);
        self.pending = None;

        let out = out?;
        Ok(out
            .mean
            .iter()
            .zip(&out.dispersion)
            .map(|(&mean, &dispersion)| Forecast::new(mean, dispersion))
            .collect())
    }

    /// Runs the input through every block.
    fn encode(
        blocks: &mut [ResidualBlock],
        front: &mut FrontIter<'_>,
        x: ArrayView3<f64>,
        mut rng: Option<&mut dyn RngCore>,
    ) -> Result<Array3<f64>> {
        let mut h = x.as_standard_layout().into_owned();
        for block in blocks {
            let rng = rng.as_mut().map(|rng| &mut **rng as &mut dyn RngCore);
            h = block.forward(front.take(block.size())?, h, rng)?;
        }

        Ok(h)
    }

    fn check_input(&self, x: &ArrayView3<f64>) -> Result<(usize, usize)> {
        let (batch, time, _) = x.dim();
        if batch == 0 || time == 0 {
            return Err(MlErr::InvalidInput(format!(
                "the input needs at least one sequence and one timestep, got {:?}",
                x.shape()
            )));
        }
        check_shape("network input", x.shape(), &[batch, time, self.config.input_size])?;
        Ok((batch, time))
    }

    fn take_pending(&mut self, expected: &'static str) -> Result<Pending> {
        self.pending.take().ok_or(MlErr::MissingCache { layer: expected })
    }

    /// Walks the hidden state gradient back through the blocks.
    fn backward_blocks(&mut self, d_hidden: Array3<f64>, head_size: usize) -> Result<Array3<f64>> {
        let mut back = self.params.back();
        // skip both heads, their gradient is already written
        back.take(2 * head_size)?;

        let mut d = d_hidden;
        for block in self.blocks.iter_mut().rev() {
            let (params, grad) = back.take(block.size())?;
            d = block.backward(params, grad, d.view())?;
        }

        Ok(d)
    }

    /// Computes the gradient of both heads and sums their hidden state gradients.
    fn backward_heads(
        &mut self,
        d_mean: Array2<f64>,
        d_dispersion: Array2<f64>,
    ) -> Result<Array2<f64>> {
        let mut back = self.params.back();

        let (params, grad) = back.take(self.dispersion_head.size())?;
        let dh_dispersion = self.dispersion_head.backward(params, grad, d_dispersion)?;
        let (params, grad) = back.take(self.mean_head.size())?;
        let dh_mean = self.mean_head.backward(params, grad, d_mean)?;

        Ok(dh_mean + dh_dispersion)
    }
}

impl Model for TemporalConvNet {
    fn size(&self) -> usize {
        self.params.len()
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
        for block in &mut self.blocks {
            block.set_training(training);
        }
    }

    fn forward(
        &mut self,
        x: ArrayView3<f64>,
        rng: Option<&mut dyn RngCore>,
    ) -> Result<NbOutput<Ix1>> {
        self.pending = None;
        let (batch, time) = self.check_input(&x)?;

        let mut front = self.params.front();
        let h = Self::encode(&mut self.blocks, &mut front, x, rng)?;
        let last = h.index_axis(Axis(1), time - 1).to_owned();

        let mean = self
            .mean_head
            .forward(front.take(self.mean_head.size())?, last.clone())?;
        let dispersion = self
            .dispersion_head
            .forward(front.take(self.dispersion_head.size())?, last)?;

        self.pending = Some(Pending::Last { batch, time });
        Ok(NbOutput {
            mean: mean.into_shape_with_order(batch)?,
            dispersion: dispersion.into_shape_with_order(batch)?,
        })
    }

    fn forward_sequence(
        &mut self,
        x: ArrayView3<f64>,
        rng: Option<&mut dyn RngCore>,
    ) -> Result<NbOutput<Ix3>> {
        self.pending = None;
        let (batch, time) = self.check_input(&x)?;
        let hidden = self.config.hidden_size;

        let mut front = self.params.front();
        let h = Self::encode(&mut self.blocks, &mut front, x, rng)?;
        let h = h.into_shape_with_order((batch * time, hidden))?;

        let mean = self
            .mean_head
            .forward(front.take(self.mean_head.size())?, h.clone())?;
        let dispersion = self
            .dispersion_head
            .forward(front.take(self.dispersion_head.size())?, h)?;

        self.pending = Some(Pending::Sequence { batch, time });
        Ok(NbOutput {
            mean: mean.into_shape_with_order((batch, time, 1))?,
            dispersion: dispersion.into_shape_with_order((batch, time, 1))?,
        })
    }

    fn backward(
        &mut self,
        d_mean: ArrayView1<f64>,
        d_dispersion: ArrayView1<f64>,
    ) -> Result<Array3<f64>> {
        let Pending::Last { batch, time } = self.take_pending("temporal conv net")? else {
            return Err(MlErr::InvalidInput(
                "backward called after a sequence forward pass".to_string(),
            ));
        };
        check_shape("mean gradient", d_mean.shape(), &[batch])?;
        check_shape("dispersion gradient", d_dispersion.shape(), &[batch])?;

        let dh = self.backward_heads(
            d_mean.to_owned().insert_axis(Axis(1)),
            d_dispersion.to_owned().insert_axis(Axis(1)),
        )?;

        let mut d_hidden = Array3::zeros((batch, time, self.config.hidden_size));
        d_hidden.index_axis_mut(Axis(1), time - 1).assign(&dh);
        self.backward_blocks(d_hidden, self.mean_head.size())
    }

    fn backward_sequence(
        &mut self,
        d_mean: ArrayView3<f64>,
        d_dispersion: ArrayView3<f64>,
    ) -> Result<Array3<f64>> {
        let Pending::Sequence { batch, time } = self.take_pending("temporal conv net")? else {
            return Err(MlErr::InvalidInput(
                "backward_sequence called after a last step forward pass".to_string(),
            ));
        };
        check_shape("mean gradient", d_mean.shape(), &[batch, time, 1])?;
        check_shape("dispersion gradient", d_dispersion.shape(), &[batch, time, 1])?;

        let rows = batch * time;
        let dh = self.backward_heads(
            d_mean.to_shape((rows, 1))?.into_owned(),
            d_dispersion.to_shape((rows, 1))?.into_owned(),
        )?;

        let d_hidden = dh.into_shape_with_order((batch, time, self.config.hidden_size))?;
        self.backward_blocks(d_hidden, self.mean_head.size())
    }

    fn params(&self) -> &[f64] {
        self.params.params()
    }

    fn grad(&self) -> &[f64] {
        self.params.grad()
    }

    fn params_and_grad_mut(&mut self) -> (&mut [f64], &mut [f64]) {
        self.params.split_mut()
    }

    fn load_params(&mut self, values: &[f64]) -> Result<()> {
        self.pending = None;
        self.params.load(values)
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn net(config: TcnConfig) -> TemporalConvNet {
        let mut rng = StdRng::seed_from_u64(17);
        TemporalConvNet::new(config, &mut rng).unwrap()
    }

    fn input(batch: usize, time: usize, features: usize) -> Array3<f64> {
        Array3::from_shape_fn((batch, time, features), |(b, t, f)| {
            ((b * 31 + t * 7 + f * 3) as f64 * 0.21).sin()
        })
    }

    #[test]
    fn doubling_dilations_and_receptive_field() {
        let config = TcnConfig::new(1, 4, 3, NonZeroUsize::new(4).unwrap(), 16);
        assert_eq!(config.dilations, [1, 2, 4, 8]);
        assert_eq!(config.receptive_field(), 1 + 2 * 15);
        assert_eq!(net(config).receptive_field(), 31);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let config = TcnConfig::new(1, 4, 3, NonZeroUsize::MIN, 8);
        let mut rng = StdRng::seed_from_u64(0);

        assert!(TemporalConvNet::new(config.clone().with_dilations(vec![]), &mut rng).is_err());
        assert!(TemporalConvNet::new(config.clone().with_dropout(1.), &mut rng).is_err());
        assert!(TemporalConvNet::new(TcnConfig { hidden_size: 0, ..config }, &mut rng).is_err());
    }

    #[test]
    fn size_matches_the_layout() {
        let tcn = net(TcnConfig::new(3, 5, 2, NonZeroUsize::new(2).unwrap(), 8));
        let last = tcn.named_parameters().last().unwrap();

        assert_eq!(last.name, "dispersion_head.bias");
        assert_eq!(last.range.end, tcn.size());
        assert_eq!(tcn.parameters().unwrap().len(), tcn.named_parameters().len());
    }

    #[test]
    fn outputs_are_positive() {
        let mut tcn = net(TcnConfig::new(2, 4, 2, NonZeroUsize::new(2).unwrap(), 6));
        let out = tcn.forward(input(3, 6, 2).view(), None).unwrap();

        assert_eq!(out.mean.dim(), 3);
        assert!(out.mean.iter().chain(&out.dispersion).all(|&v| v > 0.));
    }

    #[test]
    fn backward_must_match_the_pending_forward() {
        let mut tcn = net(TcnConfig::new(1, 3, 2, NonZeroUsize::MIN, 4));
        let x = input(2, 4, 1);
        let ones = Array1::ones(2);

        assert!(tcn.backward(ones.view(), ones.view()).is_err());

        tcn.forward_sequence(x.view(), None).unwrap();
        assert!(tcn.backward(ones.view(), ones.view()).is_err());

        tcn.forward(x.view(), None).unwrap();
        assert!(tcn.backward(ones.view(), ones.view()).is_ok());
        assert!(tcn.backward(ones.view(), ones.view()).is_err());
    }

    #[test]
    fn failed_forward_discards_the_pending_one() {
        let config = TcnConfig::new(1, 3, 2, NonZeroUsize::MIN, 4).with_dropout(0.5);
        let mut tcn = net(config);
        let x = input(2, 4, 1);
        let ones = Array1::ones(2);

        let mut rng = StdRng::seed_from_u64(3);
        tcn.forward(x.view(), Some(&mut rng)).unwrap();
        assert!(tcn.forward(x.view(), None).is_err());
        assert!(tcn.backward(ones.view(), ones.view()).is_err());

        tcn.forward_sequence(x.view(), Some(&mut rng)).unwrap();
        assert!(tcn.forward_sequence(input(2, 4, 2).view(), None).is_err());
        let seq_ones = Array3::ones((2, 4, 1));
        assert!(tcn.backward_sequence(seq_ones.view(), seq_ones.view()).is_err());
    }

    #[test]
    fn wrong_feature_count_fails() {
        let mut tcn = net(TcnConfig::new(2, 3, 2, NonZeroUsize::MIN, 4));
        assert!(tcn.forward(input(1, 4, 3).view(), None).is_err());
    }

    #[test]
    fn predict_runs_in_evaluation_mode_and_restores_training() {
        let config = TcnConfig::new(1, 3, 2, NonZeroUsize::MIN, 4).with_dropout(0.5);
        let mut tcn = net(config);
        let x = input(2, 4, 1);

        let first = tcn.predict(x.view()).unwrap();
        let second = tcn.predict(x.view()).unwrap();

        assert_eq!(first, second);
        assert!(tcn.is_training());
        assert!(tcn.forward(x.view(), None).is_err());
    }

    #[test]
    fn last_step_matches_the_sequence_forward() {
        let mut tcn = net(TcnConfig::new(2, 4, 3, NonZeroUsize::new(2).unwrap(), 5));
        let x = input(2, 5, 2);

        let last = tcn.forward(x.view(), None).unwrap();
        let seq = tcn.forward_sequence(x.view(), None).unwrap();

        for b in 0..2 {
            assert!((last.mean[b] - seq.mean[[b, 4, 0]]).abs() < 1e-12);
            assert!((last.dispersion[b] - seq.dispersion[[b, 4, 0]]).abs() < 1e-12);
        }
    }
}

use ndarray::{Array3, ArrayView3};
use rand::{Rng, RngCore};

use crate::{
    Result,
    arch::{
        ParamInfo,
        layers::{CausalConv1d, Dense, Dropout, LayerNorm, Relu},
        params::layout,
    },
    error::check_size,
};

/// A residual unit: `y = dropout(relu(norm(conv(x)))) + skip(x)`.
///
/// The skip path is the identity when the input and output widths match and a pointwise dense
/// projection otherwise. The parameters are laid out as `[conv | norm | projection]`.
#[derive(Debug, Clone)]
pub struct ResidualBlock {
    conv: CausalConv1d,
    norm: LayerNorm,
    relu: Relu,
    dropout: Dropout,
    projection: Option<Dense>,
}

impl ResidualBlock {
    /// Creates a new `ResidualBlock`.
    ///
    /// # Arguments
    /// * `in_channels` - The width of the input.
    /// * `out_channels` - The width of the output.
    /// * `kernel_size` - The kernel size of the convolution.
    /// * `dilation` - The dilation of the convolution.
    /// * `dropout` - The dropout rate of the main path.
    ///
    /// # Returns
    /// A new `ResidualBlock` instance or an error if any of the dimensions is invalid.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        dilation: usize,
        dropout: f64,
    ) -> Result<Self> {
        let projection =
            (in_channels != out_channels).then(|| Dense::new((in_channels, out_channels)));

        Ok(Self {
            conv: CausalConv1d::new(in_channels, out_channels, kernel_size, dilation)?,
            norm: LayerNorm::new(out_channels),
            relu: Relu::new(),
            dropout: Dropout::new(dropout)?,
            projection,
        })
    }

    pub fn size(&self) -> usize {
        self.conv.size() + self.norm.size() + self.projection.as_ref().map_or(0, Dense::size)
    }

    /// The amount of extra past timesteps this block lets each output see.
    pub fn receptive_field(&self) -> usize {
        self.conv.receptive_field()
    }

    pub fn set_training(&mut self, training: bool) {
        self.dropout.set_training(training);
    }

    /// Appends this block's named parameters to `out`.
    ///
    /// # Returns
    /// The offset just after this block's chunk.
    pub(crate) fn layout(&self, prefix: &str, offset: usize, out: &mut Vec<ParamInfo>) -> usize {
        let offset = layout(
            &format!("{prefix}.conv"),
            &self.conv.param_shapes(),
            offset,
            out,
        );
        let offset = layout(
            &format!("{prefix}.norm"),
            &self.norm.param_shapes(),
            offset,
            out,
        );

        match &self.projection {
            Some(projection) => layout(
                &format!("{prefix}.projection"),
                &projection.param_shapes(),
                offset,
                out,
            ),
            None => offset,
        }
    }

    pub fn init<R: Rng + ?Sized>(&self, params: &mut [f64], rng: &mut R) -> Result<()> {
        let [conv, norm, projection] = self.split(params)?;

        self.conv.init(conv, rng)?;
        self.norm.init(norm)?;
        if let Some(layer) = &self.projection {
            layer.init(projection, rng)?;
        }

        Ok(())
    }

    /// Makes a forward pass through the block.
    ///
    /// # Arguments
    /// * `params` - This block's parameters.
    /// * `x` - The `(batch, time, in_channels)` input.
    /// * `rng` - The source of randomness for the dropout, only required in training mode.
    ///
    /// # Returns
    /// The `(batch, time, out_channels)` output.
    pub fn forward(
        &mut self,
        params: &[f64],
        x: Array3<f64>,
        rng: Option<&mut dyn RngCore>,
    ) -> Result<Array3<f64>> {
        check_size("residual block parameters", params.len(), self.size())?;
        let (batch, time, in_channels) = x.dim();
        let out_channels = self.conv.out_channels();

        let (conv_params, rest) = params.split_at(self.conv.size());
        let (norm_params, projection_params) = rest.split_at(self.norm.size());

        let h = self.conv.forward(conv_params, x.view())?;
        let h = h.into_shape_with_order((batch * time, out_channels))?;
        let h = self.norm.forward(norm_params, h)?;
        let h = self.relu.forward(h);
        let h = self.dropout.forward(h, rng)?;
        let main = h.into_shape_with_order((batch, time, out_channels))?;

        let skip = match &mut self.projection {
            Some(projection) => {
                let x = x.to_shape((batch * time, in_channels))?.into_owned();
                projection
                    .forward(projection_params, x)?
                    .into_shape_with_order((batch, time, out_channels))?
            }
            None => x,
        };

        Ok(main + skip)
    }

    /// Makes a backward pass through the block, routing the gradient into both paths.
    ///
    /// # Arguments
    /// * `params` - This block's parameters.
    /// * `grad` - This block's gradient buffer, it gets overwritten.
    /// * `d` - The `(batch, time, out_channels)` gradient of the loss with respect to the output.
    ///
    /// # Returns
    /// The `(batch, time, in_channels)` gradient of the loss with respect to the input.
    pub fn backward(
        &mut self,
        params: &[f64],
        grad: &mut [f64],
        d: ArrayView3<f64>,
    ) -> Result<Array3<f64>> {
        check_size("residual block parameters", params.len(), self.size())?;
        let (batch, time, out_channels) = d.dim();
        let in_channels = self.conv.in_channels();

        let (conv_params, rest) = params.split_at(self.conv.size());
        let (norm_params, projection_params) = rest.split_at(self.norm.size());
        let [conv_grad, norm_grad, projection_grad] = self.split(grad)?;

        let d_flat = d.to_shape((batch * time, out_channels))?.into_owned();

        let d_main = self.dropout.backward(d_flat.clone())?;
        let d_main = self.relu.backward(d_main)?;
        let d_main = self.norm.backward(norm_params, norm_grad, d_main.view())?;
        let d_main = d_main.into_shape_with_order((batch, time, out_channels))?;
        let dx = self.conv.backward(conv_params, conv_grad, d_main.view())?;

        let d_skip = match &mut self.projection {
            Some(projection) => projection
                .backward(projection_params, projection_grad, d_flat.view())?
                .into_shape_with_order((batch, time, in_channels))?,
            None => d.to_owned(),
        };

        Ok(dx + d_skip)
    }

    fn split<'a>(&self, buf: &'a mut [f64]) -> Result<[&'a mut [f64]; 3]> {
        check_size("residual block buffer", buf.len(), self.size())?;

        let (conv, rest) = buf.split_at_mut(self.conv.size());
        let (norm, projection) = rest.split_at_mut(self.norm.size());
        Ok([conv, norm, projection])
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array3, s};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn initialized(block: &ResidualBlock, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut params = vec![0.; block.size()];
        block.init(&mut params, &mut rng).unwrap();
        params
    }

    #[test]
    fn projection_only_when_widths_differ() {
        let same = ResidualBlock::new(4, 4, 3, 1, 0.).unwrap();
        let widened = ResidualBlock::new(2, 4, 3, 1, 0.).unwrap();

        // conv + norm
        assert_eq!(same.size(), (3 * 4 + 1) * 4 + 8);
        // conv + norm + projection
        assert_eq!(widened.size(), (3 * 2 + 1) * 4 + 8 + (2 + 1) * 4);
    }

    #[test]
    fn layout_names_every_parameter() {
        let block = ResidualBlock::new(2, 3, 2, 1, 0.).unwrap();
        let mut infos = Vec::new();
        let end = block.layout("blocks.0", 0, &mut infos);

        let names: Vec<_> = infos.iter().map(|info| info.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "blocks.0.conv.weight",
                "blocks.0.conv.bias",
                "blocks.0.norm.gamma",
                "blocks.0.norm.beta",
                "blocks.0.projection.weight",
                "blocks.0.projection.bias",
            ]
        );
        assert_eq!(end, block.size());
    }

    #[test]
    fn the_block_is_causal() {
        let mut block = ResidualBlock::new(2, 3, 3, 2, 0.).unwrap();
        let params = initialized(&block, 1);
        let x = Array3::from_shape_fn((1, 8, 2), |(_, t, c)| (t as f64 - 3.).sin() + c as f64);

        let y = block.forward(&params, x.clone(), None).unwrap();
        for t in 0..8 {
            let mut cut = x.clone();
            cut.slice_mut(s![.., t + 1.., ..]).fill(0.);
            let y_cut = block.forward(&params, cut, None).unwrap();

            let diff = &y.slice(s![.., ..=t, ..]) - &y_cut.slice(s![.., ..=t, ..]);
            assert!(diff.iter().all(|d| d.abs() < 1e-12), "leak at t = {t}");
        }
    }

    #[test]
    fn backward_matches_finite_differences() {
        for (in_channels, out_channels) in [(2, 3), (3, 3)] {
            let mut block = ResidualBlock::new(in_channels, out_channels, 2, 2, 0.).unwrap();
            let params = initialized(&block, 4);
            let x = Array3::from_shape_fn((2, 5, in_channels), |(b, t, c)| {
                ((b * 7 + t * 3 + c) as f64 * 0.37).cos()
            });
            let w = Array3::from_shape_fn((2, 5, out_channels), |(b, t, c)| {
                ((b + 2 * t + 3 * c) as f64 * 0.11).sin()
            });
            let loss = |block: &mut ResidualBlock, params: &[f64], x: &Array3<f64>| {
                (block.forward(params, x.clone(), None).unwrap() * &w).sum()
            };

            block.forward(&params, x.clone(), None).unwrap();
            let mut grad = vec![0.; block.size()];
            let dx = block.backward(&params, &mut grad, w.view()).unwrap();

            let h = 1e-6;
            for i in 0..params.len() {
                let mut plus = params.clone();
                plus[i] += h;
                let mut minus = params.clone();
                minus[i] -= h;
                let num = (loss(&mut block, &plus, &x) - loss(&mut block, &minus, &x)) / (2. * h);
                assert!(
                    (num - grad[i]).abs() < 1e-4 * (1. + num.abs()),
                    "param {i}: {num} vs {}",
                    grad[i]
                );
            }

            for (idx, &analytic) in dx.indexed_iter() {
                let mut plus = x.clone();
                plus[idx] += h;
                let mut minus = x.clone();
                minus[idx] -= h;
                let num = (loss(&mut block, &params, &plus) - loss(&mut block, &params, &minus))
                    / (2. * h);
                assert!(
                    (num - analytic).abs() < 1e-4 * (1. + num.abs()),
                    "input {idx:?}: {num} vs {analytic}"
                );
            }
        }
    }

    #[test]
    fn training_dropout_needs_a_rng() {
        let mut block = ResidualBlock::new(1, 1, 2, 1, 0.5).unwrap();
        let params = initialized(&block, 2);
        assert!(block.forward(&params, Array3::ones((1, 3, 1)), None).is_err());

        block.set_training(false);
        assert!(block.forward(&params, Array3::ones((1, 3, 1)), None).is_ok());
    }
}

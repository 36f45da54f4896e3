use ndarray::{linalg, prelude::*};
use rand::Rng;

use crate::{
    MlErr, Result,
    arch::{ParamShape, init},
    error::{check_shape, check_size},
};

/// A causal dilated 1-D convolution over `(batch, time, channels)` sequences.
///
/// The input is left padded with `(kernel_size - 1) * dilation` zeros so the output at position
/// `t` only sees inputs at positions `<= t`:
///
/// `y[b, t, o] = bias[o] + Σ_k Σ_i W[k, i, o] · xpad[b, t + k·dilation, i]`
///
/// The parameters are laid out as the `(kernel_size, in, out)` weight followed by the `out` bias.
#[derive(Debug, Clone)]
pub struct CausalConv1d {
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    dilation: usize,
    size: usize,

    // Forward metadata
    padded: Option<Array3<f64>>,
}

impl CausalConv1d {
    /// Creates a new `CausalConv1d` layer.
    ///
    /// # Arguments
    /// * `in_channels` - The amount of input features per timestep.
    /// * `out_channels` - The amount of output features per timestep.
    /// * `kernel_size` - The amount of taps of the kernel.
    /// * `dilation` - The spacing between consecutive taps.
    ///
    /// # Returns
    /// A new `CausalConv1d` instance or an error if any dimension is zero.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        dilation: usize,
    ) -> Result<Self> {
        if in_channels == 0 || out_channels == 0 || kernel_size == 0 || dilation == 0 {
            return Err(MlErr::InvalidConfig(format!(
                "convolution dimensions must be positive, got in {in_channels}, out {out_channels}, kernel {kernel_size}, dilation {dilation}"
            )));
        }

        Ok(Self {
            in_channels,
            out_channels,
            kernel_size,
            dilation,
            size: (kernel_size * in_channels + 1) * out_channels,
            padded: None,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// The amount of zeros prepended to the time axis.
    pub fn padding(&self) -> usize {
        (self.kernel_size - 1) * self.dilation
    }

    /// The amount of extra past timesteps this layer lets each output see.
    pub fn receptive_field(&self) -> usize {
        self.padding()
    }

    pub fn param_shapes(&self) -> Vec<ParamShape> {
        vec![
            ParamShape::new(
                "weight",
                &[self.kernel_size, self.in_channels, self.out_channels],
            ),
            ParamShape::new("bias", &[self.out_channels]),
        ]
    }

    /// Initializes the kernel with Kaiming normal values and the biases with zeros.
    pub fn init<R: Rng + ?Sized>(&self, params: &mut [f64], rng: &mut R) -> Result<()> {
        check_size("convolution parameters", params.len(), self.size)?;

        let (w, b) = params.split_at_mut(self.size - self.out_channels);
        init::kaiming(w, self.kernel_size * self.in_channels, rng)?;
        b.fill(0.);
        Ok(())
    }

    /// Makes a forward pass through the layer, caching the padded input for the backward pass.
    ///
    /// # Arguments
    /// * `params` - This layer's parameters.
    /// * `x` - The `(batch, time, in_channels)` input.
    ///
    /// # Returns
    /// The `(batch, time, out_channels)` output.
    pub fn forward(&mut self, params: &[f64], x: ArrayView3<f64>) -> Result<Array3<f64>> {
        let (batch, time, channels) = x.dim();
        check_size("convolution input channels", channels, self.in_channels)?;

        let pad = self.padding();
        let mut padded = Array3::zeros((batch, time + pad, channels));
        padded.slice_mut(s![.., pad.., ..]).assign(&x);

        let (w, b) = self.view_params(params)?;
        let mut y = Array2::zeros((batch * time, self.out_channels));
        for k in 0..self.kernel_size {
            let offset = k * self.dilation;
            let xk = padded.slice(s![.., offset..offset + time, ..]);
            let xk = xk.to_shape((batch * time, channels))?;
            linalg::general_mat_mul(1.0, &xk, &w.index_axis(Axis(0), k), 1.0, &mut y);
        }
        y += &b;

        self.padded = Some(padded);
        Ok(y.into_shape_with_order((batch, time, self.out_channels))?)
    }

    /// Makes a backward pass through the layer, walking the same padded buffer as the forward.
    ///
    /// # Arguments
    /// * `params` - This layer's parameters.
    /// * `grad` - This layer's gradient buffer, it gets overwritten.
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
        let padded = self.padded.take().ok_or(MlErr::MissingCache { layer: "conv1d" })?;

        let pad = self.padding();
        let (batch, padded_time, channels) = padded.dim();
        let time = padded_time - pad;
        check_shape(
            "convolution gradient",
            d.shape(),
            &[batch, time, self.out_channels],
        )?;

        let d = d.to_shape((batch * time, self.out_channels))?;
        let (w, _) = self.view_params(params)?;
        let (mut dw, mut db) = self.view_grad(grad)?;
        db.assign(&d.sum_axis(Axis(0)));

        let mut dpadded = Array3::zeros((batch, padded_time, channels));
        for k in 0..self.kernel_size {
            let offset = k * self.dilation;
            let xk = padded.slice(s![.., offset..offset + time, ..]);
            let xk = xk.to_shape((batch * time, channels))?;

            let mut dwk = dw.index_axis_mut(Axis(0), k);
            linalg::general_mat_mul(1.0, &xk.t(), &d, 0.0, &mut dwk);

            let mut dxk = Array2::zeros((batch * time, channels));
            linalg::general_mat_mul(1.0, &d, &w.index_axis(Axis(0), k).t(), 0.0, &mut dxk);
            let dxk = dxk.into_shape_with_order((batch, time, channels))?;

            let mut window = dpadded.slice_mut(s![.., offset..offset + time, ..]);
            window += &dxk;
        }

        Ok(dpadded.slice(s![.., pad.., ..]).to_owned())
    }

    fn view_grad<'a>(
        &self,
        grad: &'a mut [f64],
    ) -> Result<(ArrayViewMut3<'a, f64>, ArrayViewMut1<'a, f64>)> {
        check_size("convolution gradient buffer", grad.len(), self.size)?;

        let (dw_raw, db_raw) = grad.split_at_mut(self.size - self.out_channels);
        let dw = ArrayViewMut3::from_shape(
            (self.kernel_size, self.in_channels, self.out_channels),
            dw_raw,
        )?;
        let db = ArrayViewMut1::from_shape(self.out_channels, db_raw)?;
        Ok((dw, db))
    }

    fn view_params<'a>(
        &self,
        params: &'a [f64],
    ) -> Result<(ArrayView3<'a, f64>, ArrayView1<'a, f64>)> {
        check_size("convolution parameters", params.len(), self.size)?;

        let (w_raw, b_raw) = params.split_at(self.size - self.out_channels);
        let w = ArrayView3::from_shape(
            (self.kernel_size, self.in_channels, self.out_channels),
            w_raw,
        )?;
        let b = ArrayView1::from_shape(self.out_channels, b_raw)?;
        Ok((w, b))
    }
}

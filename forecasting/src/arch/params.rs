use std::ops::Range;

use ndarray::{ArrayViewD, IxDyn};

use crate::{MlErr, Result};

/// The declaration of a single named parameter of a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamShape {
    pub name: &'static str,
    pub shape: Vec<usize>,
}

impl ParamShape {
    pub fn new(name: &'static str, shape: &[usize]) -> Self {
        Self {
            name,
            shape: shape.to_vec(),
        }
    }

    /// The amount of scalars this parameter holds.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A parameter placed inside the model's flat buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamInfo {
    pub name: String,
    pub shape: Vec<usize>,
    pub range: Range<usize>,
}

/// Lays out the given named shapes one after the other, starting at `offset`.
///
/// # Arguments
/// * `prefix` - The prefix prepended to every parameter name.
/// * `shapes` - The parameter declarations of a layer.
/// * `offset` - The position of the layer's chunk in the flat buffer.
/// * `out` - Where to push the resulting layout entries.
///
/// # Returns
/// The offset just after the last laid out parameter.
pub(crate) fn layout(
    prefix: &str,
    shapes: &[ParamShape],
    mut offset: usize,
    out: &mut Vec<ParamInfo>,
) -> usize {
    for ParamShape { name, shape } in shapes {
        let len = shape.iter().product::<usize>();
        out.push(ParamInfo {
            name: format!("{prefix}.{name}"),
            shape: shape.clone(),
            range: offset..offset + len,
        });
        offset += len;
    }

    offset
}

/// Owns the parameters of a model and their gradient as two flat buffers of the same length.
///
/// Layers never own their values directly: they are given their contiguous chunk of the buffers,
/// in order when traversing forward through the `FrontIter` and in reverse order when traversing
/// backward through the `BackIter`.
#[derive(Debug, Clone)]
pub struct ParamBuffer {
    params: Vec<f64>,
    grad: Vec<f64>,
}

impl ParamBuffer {
    /// Creates a new zeroed `ParamBuffer` of `size` parameters.
    pub fn zeros(size: usize) -> Self {
        Self {
            params: vec![0.; size],
            grad: vec![0.; size],
        }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn params(&self) -> &[f64] {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut [f64] {
        &mut self.params
    }

    pub fn grad(&self) -> &[f64] {
        &self.grad
    }

    /// Splits the buffer into the parameters and the gradient, for optimizers.
    pub fn split_mut(&mut self) -> (&mut [f64], &mut [f64]) {
        (&mut self.params, &mut self.grad)
    }

    /// Overwrites every parameter with `values`.
    ///
    /// # Returns
    /// An error if the lengths differ.
    pub fn load(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.params.len() {
            return Err(MlErr::SizeMismatch {
                what: "parameter buffer",
                got: values.len(),
                expected: self.params.len(),
            });
        }

        self.params.copy_from_slice(values);
        Ok(())
    }

    /// Creates a new `FrontIter` over the parameters.
    pub fn front(&self) -> FrontIter<'_> {
        FrontIter {
            rest: &self.params,
        }
    }

    /// Creates a new `BackIter` over the parameters and the gradient.
    pub fn back(&mut self) -> BackIter<'_> {
        BackIter {
            params: &self.params,
            grad: &mut self.grad,
        }
    }

    /// Gives dynamic views of every laid out parameter.
    pub fn views<'a>(
        &'a self,
        layout: &'a [ParamInfo],
    ) -> Result<Vec<(&'a str, ArrayViewD<'a, f64>)>> {
        views(&self.params, layout)
    }

    /// Gives dynamic views of every laid out parameter's gradient.
    pub fn grad_views<'a>(
        &'a self,
        layout: &'a [ParamInfo],
    ) -> Result<Vec<(&'a str, ArrayViewD<'a, f64>)>> {
        views(&self.grad, layout)
    }
}

fn views<'a>(
    buf: &'a [f64],
    layout: &'a [ParamInfo],
) -> Result<Vec<(&'a str, ArrayViewD<'a, f64>)>> {
    layout
        .iter()
        .map(|info| {
            let slice = buf.get(info.range.clone()).ok_or(MlErr::SizeMismatch {
                what: "parameter layout",
                got: buf.len(),
                expected: info.range.end,
            })?;
            let view = ArrayViewD::from_shape(IxDyn(&info.shape), slice)?;
            Ok((info.name.as_str(), view))
        })
        .collect()
}

/// The model's forward parameter iterator.
pub struct FrontIter<'pb> {
    rest: &'pb [f64],
}

impl<'pb> FrontIter<'pb> {
    /// Takes the next `n` parameters.
    ///
    /// # Returns
    /// A slice of parameters or an error if there aren't enough of them left.
    pub fn take(&mut self, n: usize) -> Result<&'pb [f64]> {
        if n > self.rest.len() {
            return Err(MlErr::SizeMismatch {
                what: "remaining parameters",
                got: self.rest.len(),
                expected: n,
            });
        }

        let (head, tail) = self.rest.split_at(n);
        self.rest = tail;
        Ok(head)
    }
}

/// The model's backward parameter and gradient iterator.
pub struct BackIter<'pb> {
    params: &'pb [f64],
    grad: &'pb mut [f64],
}

impl<'pb> BackIter<'pb> {
    /// Takes the last `n` parameters and their gradient.
    ///
    /// # Returns
    /// A tuple of parameters and gradient or an error if there aren't enough of them left.
    pub fn take(&mut self, n: usize) -> Result<(&'pb [f64], &'pb mut [f64])> {
        let len = self.params.len();
        if n > len {
            return Err(MlErr::SizeMismatch {
                what: "remaining parameters",
                got: len,
                expected: n,
            });
        }

        let (params_head, params_tail) = self.params.split_at(len - n);
        let grad = std::mem::take(&mut self.grad);
        let (grad_head, grad_tail) = grad.split_at_mut(len - n);

        self.params = params_head;
        self.grad = grad_head;
        Ok((params_tail, grad_tail))
    }
}

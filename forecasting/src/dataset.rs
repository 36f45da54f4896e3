use std::{num::NonZeroUsize, ops::Range};

use ndarray::{Array1, Array2, Array3, ArrayView3, Axis, s};
use rand::{Rng, seq::SliceRandom};

use crate::{MlErr, Result, error::check_size};

/// The forecast targets of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum Targets {
    /// One `(examples,)` target per window, the step after it.
    Last(Array1<f64>),
    /// One `(examples, time)` target per timestep of every window.
    Sequence(Array2<f64>),
}

impl Targets {
    pub fn len(&self) -> usize {
        match self {
            Targets::Last(y) => y.len(),
            Targets::Sequence(y) => y.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn select(&self, indices: &[usize]) -> Self {
        match self {
            Targets::Last(y) => Targets::Last(y.select(Axis(0), indices)),
            Targets::Sequence(y) => Targets::Sequence(y.select(Axis(0), indices)),
        }
    }

    fn slice(&self, range: Range<usize>) -> Self {
        match self {
            Targets::Last(y) => Targets::Last(y.slice(s![range]).to_owned()),
            Targets::Sequence(y) => Targets::Sequence(y.slice(s![range, ..]).to_owned()),
        }
    }
}

/// A batch of windows and their targets.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub x: Array3<f64>,
    pub y: Targets,
}

/// A set of `(seq_len, features)` windows and their forecast targets.
#[derive(Debug, Clone)]
pub struct Dataset {
    x: Array3<f64>,
    y: Targets,
    order: Vec<usize>,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Arguments
    /// * `x` - The `(examples, seq_len, features)` windows.
    /// * `y` - The targets, one per example or one per example and timestep.
    ///
    /// # Returns
    /// A new `Dataset` instance or an error if the shapes don't agree.
    pub fn new(x: Array3<f64>, y: Targets) -> Result<Self> {
        check_size("dataset targets", y.len(), x.len_of(Axis(0)))?;
        if let Targets::Sequence(y) = &y {
            check_size("dataset target steps", y.ncols(), x.len_of(Axis(1)))?;
        }

        let order = (0..x.len_of(Axis(0))).collect();
        Ok(Self { x, y, order })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn seq_len(&self) -> usize {
        self.x.len_of(Axis(1))
    }

    pub fn features(&self) -> usize {
        self.x.len_of(Axis(2))
    }

    pub fn x(&self) -> ArrayView3<'_, f64> {
        self.x.view()
    }

    pub fn y(&self) -> &Targets {
        &self.y
    }

    /// Shuffles the order in which the examples are batched.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.order.shuffle(rng);
    }

    /// Iterates over the examples in `batch_size` chunks, the last one possibly shorter.
    pub fn batches(&self, batch_size: NonZeroUsize) -> impl Iterator<Item = Batch> + '_ {
        self.order.chunks(batch_size.get()).map(|indices| Batch {
            x: self.x.select(Axis(0), indices),
            y: self.y.select(indices),
        })
    }

    /// The whole dataset as a single batch, in chronological order.
    pub fn full(&self) -> Batch {
        Batch {
            x: self.x.clone(),
            y: self.y.clone(),
        }
    }

    /// A chronological slice of the examples.
    ///
    /// # Returns
    /// A new `Dataset` or an error if the range is out of bounds.
    pub fn subset(&self, range: Range<usize>) -> Result<Self> {
        if range.start > range.end || range.end > self.x.len_of(Axis(0)) {
            return Err(MlErr::InvalidInput(format!(
                "subset {range:?} out of bounds for {} examples",
                self.x.len_of(Axis(0))
            )));
        }

        let x = self.x.slice(s![range.clone(), .., ..]).to_owned();
        Self::new(x, self.y.slice(range))
    }

    /// Splits the examples chronologically, the first `fraction` of them going to the first set.
    pub fn split(&self, fraction: f64) -> Result<(Self, Self)> {
        if !(0. ..=1.).contains(&fraction) {
            return Err(MlErr::InvalidInput(format!(
                "split fraction must be in [0, 1], got {fraction}"
            )));
        }

        let n = self.x.len_of(Axis(0));
        let at = (n as f64 * fraction).round() as usize;
        Ok((self.subset(0..at)?, self.subset(at..n)?))
    }
}

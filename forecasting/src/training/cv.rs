use std::{num::NonZeroUsize, ops::Range};

use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{Metrics, TrainerBuilder};
use crate::{MlErr, Result, dataset::Dataset, specs::TrainerSpec};

/// A train/test split of chronologically ordered examples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Range<usize>,
    pub test: Range<usize>,
}

/// An expanding window splitter for time series.
///
/// The `i`-th fold tests on the `i`-th of the last `n_splits` blocks of `test_size` examples and
/// trains on every example before it, leaving `gap` examples out in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSeriesSplit {
    pub n_splits: NonZeroUsize,
    /// Defaults to `n / (n_splits + 1)`.
    pub test_size: Option<NonZeroUsize>,
    pub gap: usize,
}

impl TimeSeriesSplit {
    pub fn new(n_splits: NonZeroUsize) -> Self {
        Self {
            n_splits,
            test_size: None,
            gap: 0,
        }
    }

    pub fn with_test_size(mut self, test_size: NonZeroUsize) -> Self {
        self.test_size = Some(test_size);
        self
    }

    pub fn with_gap(mut self, gap: usize) -> Self {
        self.gap = gap;
        self
    }

    /// Splits `n` examples into folds.
    ///
    /// # Returns
    /// The folds in chronological order or an error if some fold would have no training or
    /// testing examples.
    pub fn split(&self, n: usize) -> Result<Vec<Fold>> {
        let n_splits = self.n_splits.get();
        let test_size = match self.test_size {
            Some(test_size) => test_size.get(),
            None => n / (n_splits + 1),
        };

        let tested = n_splits * test_size;
        if test_size == 0 || tested + self.gap >= n {
            return Err(MlErr::InvalidInput(format!(
                "cannot make {n_splits} folds with a test size of {test_size} and a gap of {} out of {n} examples",
                self.gap
            )));
        }

        let first = n - tested;
        Ok((0..n_splits)
            .map(|i| {
                let start = first + i * test_size;
                Fold {
                    train: 0..start - self.gap,
                    test: start..start + test_size,
                }
            })
            .collect())
    }
}

/// The outcome of training and testing on a single fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldReport {
    pub fold: usize,
    pub train_len: usize,
    pub test_len: usize,
    /// The mean negative log-likelihood on the test examples.
    pub valid_loss: f64,
    pub metrics: Metrics,
}

/// Trains a fresh trainer per fold, in parallel, and scores it on the fold's test examples.
///
/// Fold `i` is seeded with `seed + i` when the spec has a seed.
///
/// # Arguments
/// * `spec` - The specification every trainer is built from.
/// * `data` - The chronologically ordered examples.
/// * `splitter` - How to split the examples.
/// * `level` - The interval level used for the coverage metric.
///
/// # Returns
/// One report per fold, in fold order.
pub fn cross_validate(
    spec: &TrainerSpec,
    data: &Dataset,
    splitter: &TimeSeriesSplit,
    level: f64,
) -> Result<Vec<FoldReport>> {
    let folds = splitter.split(data.len())?;

    folds
        .into_par_iter()
        .enumerate()
        .map(|(i, Fold { train, test })| {
            let mut spec = spec.clone();
            spec.seed = spec.seed.map(|seed| seed.wrapping_add(i as u64));
            let mut trainer = TrainerBuilder::new().build(&spec)?;

            let mut train = data.subset(train)?;
            let test = data.subset(test)?;
            trainer.fit(&mut train, None)?;

            let valid_loss = trainer.evaluate(&test)?;
            let metrics = trainer.metrics(&test, level)?;
            info!(fold = i, valid_loss = valid_loss, mae = metrics.mae; "finished fold");

            Ok(FoldReport {
                fold: i,
                train_len: train.len(),
                test_len: test.len(),
                valid_loss,
                metrics,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn folds_expand_and_test_after_training() {
        let folds = TimeSeriesSplit::new(nz(3)).split(12).unwrap();

        assert_eq!(
            folds,
            [
                Fold {
                    train: 0..3,
                    test: 3..6
                },
                Fold {
                    train: 0..6,
                    test: 6..9
                },
                Fold {
                    train: 0..9,
                    test: 9..12
                },
            ]
        );
    }

    #[test]
    fn gap_separates_train_and_test() {
        let splitter = TimeSeriesSplit::new(nz(2)).with_test_size(nz(2)).with_gap(1);

        for fold in splitter.split(10).unwrap() {
            assert_eq!(fold.train.end + 1, fold.test.start);
        }
    }

    #[test]
    fn too_few_examples_fail() {
        assert!(TimeSeriesSplit::new(nz(4)).split(3).is_err());
        assert!(TimeSeriesSplit::new(nz(2)).with_test_size(nz(5)).split(10).is_err());
    }
}

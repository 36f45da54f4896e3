use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::Result;

/// Fills `out` using Kaiming normal initialization, that is, sampling from
/// `N(0, sqrt(2 / fan_in))`.
///
/// # Arguments
/// * `out` - The parameters to initialize.
/// * `fan_in` - The number of input units feeding each output unit.
/// * `rng` - A random number generator.
///
/// # Returns
/// An error if the calculated standard deviation is not finite.
pub fn kaiming<R: Rng + ?Sized>(out: &mut [f64], fan_in: usize, rng: &mut R) -> Result<()> {
    let std_dev = (2. / fan_in.max(1) as f64).sqrt();
    normal(out, 0., std_dev, rng)
}

/// Fills `out` sampling from `N(mean, std_dev)`.
pub fn normal<R: Rng + ?Sized>(
    out: &mut [f64],
    mean: f64,
    std_dev: f64,
    rng: &mut R,
) -> Result<()> {
    let distribution = Normal::new(mean, std_dev)?;
    out.iter_mut().for_each(|p| *p = distribution.sample(rng));
    Ok(())
}

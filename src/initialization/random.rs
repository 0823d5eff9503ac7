use rand::Rng;
use rand_distr::{Distribution, Normal};

use super::ParamGen;
use crate::{FmErr, Result};

/// Draws up to a fixed amount of initial weights from a distribution.
pub struct RandParamGen<R: Rng, D: Distribution<f32>> {
    rng: R,
    distribution: D,
    remaining: usize,
}

impl<R: Rng, D: Distribution<f32>> RandParamGen<R, D> {
    /// Creates a new `RandParamGen`.
    ///
    /// # Arguments
    /// * `rng` - The source of randomness, seeded by the caller for reproducible runs.
    /// * `distribution` - What every weight is drawn from.
    /// * `limit` - How many weights the generator yields before it's exhausted.
    pub fn new(rng: R, distribution: D, limit: usize) -> Self {
        Self {
            rng,
            distribution,
            remaining: limit,
        }
    }
}

impl<R: Rng> RandParamGen<R, Normal<f32>> {
    /// Creates a `RandParamGen` drawing from `Normal(mean, std_dev)`.
    ///
    /// # Returns
    /// An `Init` error if `std_dev` is NaN or negative.
    pub fn normal(rng: R, limit: usize, mean: f32, std_dev: f32) -> Result<Self> {
        let distribution = Normal::new(mean, std_dev).map_err(|e| FmErr::Init(e.to_string()))?;
        Ok(Self::new(rng, distribution, limit))
    }
}

impl<R: Rng, D: Distribution<f32>> ParamGen for RandParamGen<R, D> {
    fn sample(&mut self, n: usize) -> Option<Vec<f32>> {
        if self.remaining == 0 {
            return None;
        }

        let take = n.min(self.remaining);
        self.remaining -= take;
        Some(
            (&mut self.rng)
                .sample_iter(&self.distribution)
                .take(take)
                .collect(),
        )
    }
}

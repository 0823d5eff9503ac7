use crate::{FmErr, Result};

/// Per-thread dense gradient accumulators.
///
/// Each lane has the length of the weight vector and is written by exactly one thread during
/// a parallel pass, so no locks or atomics are needed on the hot path. Lanes are folded into
/// the output single-threaded, in lane order, and zeroed on the way.
#[derive(Debug, Clone)]
pub struct GradArena {
    len: usize,
    lanes: Box<[Box<[f32]>]>,
}

impl GradArena {
    /// Creates a new zeroed `GradArena`.
    ///
    /// # Arguments
    /// * `nlanes` - The amount of threads that will accumulate concurrently.
    /// * `len` - The length of each lane, the amount of weights.
    pub fn new(nlanes: usize, len: usize) -> Self {
        let lanes = (0..nlanes)
            .map(|_| vec![0.0; len].into_boxed_slice())
            .collect();

        Self { len, lanes }
    }

    /// Returns the length of each lane.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn nlanes(&self) -> usize {
        self.lanes.len()
    }

    /// Returns the lanes, one per thread.
    pub fn lanes_mut(&mut self) -> &mut [Box<[f32]>] {
        &mut self.lanes
    }

    /// Zeroes every lane.
    pub fn clear(&mut self) {
        self.lanes.iter_mut().for_each(|lane| lane.fill(0.0));
    }

    /// Adds every lane into `out` and zeroes the lanes.
    ///
    /// # Returns
    /// A `SizeMismatch` error if `out` isn't as long as the lanes.
    pub fn merge_into(&mut self, out: &mut [f32]) -> Result<()> {
        if out.len() != self.len {
            return Err(FmErr::SizeMismatch {
                what: "gradient buffer",
                got: out.len(),
                expected: self.len,
            });
        }

        for lane in self.lanes.iter_mut() {
            out.iter_mut().zip(lane.iter_mut()).for_each(|(o, g)| {
                *o += *g;
                *g = 0.0;
            });
        }

        Ok(())
    }
}

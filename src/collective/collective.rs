use std::num::NonZeroUsize;

use crate::Result;

/// The position of a worker inside its collective group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerContext {
    pub rank: usize,
    pub world_size: NonZeroUsize,
}

impl WorkerContext {
    /// # Panics
    /// If `rank` is not smaller than `world_size`.
    pub fn new(rank: usize, world_size: NonZeroUsize) -> Self {
        assert!(rank < world_size.get(), "rank out of range");
        Self { rank, world_size }
    }

    /// The context of a worker running alone.
    pub fn solo() -> Self {
        Self::new(0, NonZeroUsize::MIN)
    }

    /// Whether this worker is responsible for the operations that must happen exactly once.
    #[inline]
    pub fn is_lead(&self) -> bool {
        self.rank == 0
    }
}

/// Blocking all-participant operations across the workers of a run.
///
/// Every worker must reach the same call with buffers of the same length, otherwise the group
/// deadlocks or fails. Results are identical on every rank.
pub trait Collective: Send + Sync {
    /// Returns the caller's position in the group.
    fn context(&self) -> WorkerContext;

    /// Replaces every element of `buf` with its sum across workers.
    fn reduce_sum_f64(&self, buf: &mut [f64]) -> Result<()>;

    /// Replaces every element of `buf` with its maximum across workers.
    fn reduce_max_f64(&self, buf: &mut [f64]) -> Result<()>;

    /// Overwrites `buf` on every worker with the contents it has on `root`.
    fn broadcast_f64(&self, buf: &mut [f64], root: usize) -> Result<()>;

    fn reduce_sum_scalar(&self, value: f64) -> Result<f64> {
        let mut buf = [value];
        self.reduce_sum_f64(&mut buf)?;
        Ok(buf[0])
    }

    // Counts travel as f64, exact up to 2^53.
    fn reduce_sum_u64(&self, value: u64) -> Result<u64> {
        let mut buf = [value as f64];
        self.reduce_sum_f64(&mut buf)?;
        Ok(buf[0] as u64)
    }

    fn reduce_max_u64(&self, value: u64) -> Result<u64> {
        let mut buf = [value as f64];
        self.reduce_max_f64(&mut buf)?;
        Ok(buf[0] as u64)
    }

    /// Sums an `f32` buffer across workers, accumulating in `f64`.
    fn reduce_sum_f32(&self, buf: &mut [f32]) -> Result<()> {
        let mut wide: Vec<f64> = buf.iter().map(|&x| x as f64).collect();
        self.reduce_sum_f64(&mut wide)?;
        buf.iter_mut().zip(wide).for_each(|(x, w)| *x = w as f32);
        Ok(())
    }

    fn broadcast_f32(&self, buf: &mut [f32], root: usize) -> Result<()> {
        let mut wide: Vec<f64> = buf.iter().map(|&x| x as f64).collect();
        self.broadcast_f64(&mut wide, root)?;
        buf.iter_mut().zip(wide).for_each(|(x, w)| *x = w as f32);
        Ok(())
    }
}

use super::{Collective, WorkerContext};
use crate::Result;

/// A group of a single worker, every collective leaves its input untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct Solo;

impl Collective for Solo {
    fn context(&self) -> WorkerContext {
        WorkerContext::solo()
    }

    fn reduce_sum_f64(&self, _buf: &mut [f64]) -> Result<()> {
        Ok(())
    }

    fn reduce_max_f64(&self, _buf: &mut [f64]) -> Result<()> {
        Ok(())
    }

    fn broadcast_f64(&self, _buf: &mut [f64], _root: usize) -> Result<()> {
        Ok(())
    }
}

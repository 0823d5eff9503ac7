use std::io::{Read, Write};

use crate::Result;

/// The contract between an iterative optimizer and the function it minimizes.
///
/// The optimizer owns the weight buffer. It calls `init_num_dim` and `init_model` once, then
/// interleaves `eval` and `calc_grad` on its current weights as many times as it needs.
/// In a distributed run the returned values are this worker's contribution only, the optimizer
/// sums them across workers.
pub trait ObjFunction {
    /// Negotiates the problem size with the rest of the workers.
    ///
    /// # Returns
    /// The amount of weights and the global amount of training rows.
    fn init_num_dim(&mut self) -> Result<(usize, usize)>;

    /// Writes the initial weights, identical on every worker.
    fn init_model(&mut self, weight: &mut [f32]) -> Result<()>;

    /// Evaluates the objective at `weight` over the training or the validation shard.
    fn eval(&mut self, weight: &[f32], validation: bool) -> Result<f64>;

    /// Overwrites `out_grad` with the gradient of the objective at `weight`.
    fn calc_grad(&mut self, out_grad: &mut [f32], weight: &[f32]) -> Result<()>;

    /// Whether `eval` can be called with `validation = true`.
    fn has_validation(&self) -> bool {
        false
    }

    /// Writes a checkpoint of the problem's bookkeeping, not the weights.
    fn save(&self, writer: &mut dyn Write) -> Result<()>;

    /// Restores a checkpoint written by `save`, in place of `init_num_dim`.
    ///
    /// # Returns
    /// The restored amount of weights and global amount of training rows.
    fn load(&mut self, reader: &mut dyn Read) -> Result<(usize, usize)>;

    /// Writes `weight` as a standalone model file.
    fn save_model(&self, writer: &mut dyn Write, weight: &[f32]) -> Result<()>;
}

use std::{num::NonZeroUsize, sync::Arc};

use parking_lot::{Condvar, Mutex, RwLock};

use super::{Collective, WorkerContext};
use crate::{FmErr, Result};

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    aborted: bool,
}

/// A reusable barrier that can be torn down when one of its members fails.
#[derive(Debug)]
struct GroupBarrier {
    size: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

impl GroupBarrier {
    fn new(size: usize) -> Self {
        Self {
            size,
            state: Mutex::new(BarrierState::default()),
            cvar: Condvar::new(),
        }
    }

    fn wait(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.aborted {
            return Err(FmErr::Aborted);
        }

        let generation = state.generation;
        state.arrived += 1;

        if state.arrived == self.size {
            state.arrived = 0;
            state.generation += 1;
            self.cvar.notify_all();
            return Ok(());
        }

        while state.generation == generation && !state.aborted {
            self.cvar.wait(&mut state);
        }

        match state.generation == generation {
            true => Err(FmErr::Aborted),
            false => Ok(()),
        }
    }

    fn abort(&self) {
        self.state.lock().aborted = true;
        self.cvar.notify_all();
    }
}

#[derive(Debug)]
struct Shared {
    barrier: GroupBarrier,
    slots: Box<[RwLock<Vec<f64>>]>,
}

/// One member of an in-process collective group, meant to be moved into its own thread.
///
/// Each operation has two phases separated by a barrier: every rank writes its contribution
/// into its own slot, then every rank folds all the slots in rank order. A trailing barrier
/// keeps the slots alive until everyone has read them. Folding in rank order makes the
/// results bit-identical across ranks regardless of thread scheduling.
#[derive(Debug, Clone)]
pub struct LocalCollective {
    ctx: WorkerContext,
    shared: Arc<Shared>,
}

/// Creates an in-process group of `world_size` workers, ordered by rank.
pub fn local_group(world_size: NonZeroUsize) -> Vec<LocalCollective> {
    let n = world_size.get();
    let shared = Arc::new(Shared {
        barrier: GroupBarrier::new(n),
        slots: (0..n).map(|_| RwLock::new(Vec::new())).collect(),
    });

    (0..n)
        .map(|rank| LocalCollective {
            ctx: WorkerContext::new(rank, world_size),
            shared: Arc::clone(&shared),
        })
        .collect()
}

impl LocalCollective {
    /// Fails every pending and future operation of the group, on every member.
    ///
    /// Must be called by a member that gives up before the rest of the group is done,
    /// otherwise its peers block forever on the next operation.
    pub fn abort(&self) {
        self.shared.barrier.abort();
    }

    fn publish(&self, buf: &[f64]) {
        let mut slot = self.shared.slots[self.ctx.rank].write();
        slot.clear();
        slot.extend_from_slice(buf);
    }

    fn check_len(&self, len: usize) -> Result<()> {
        for slot in self.shared.slots.iter() {
            let got = slot.read().len();
            if got != len {
                return Err(FmErr::SizeMismatch {
                    what: "collective buffers",
                    got,
                    expected: len,
                });
            }
        }
        Ok(())
    }

    fn all_reduce<F>(&self, buf: &mut [f64], op: F) -> Result<()>
    where
        F: Fn(f64, f64) -> f64,
    {
        self.publish(buf);
        self.shared.barrier.wait()?;

        let ret = self.check_len(buf.len()).map(|_| {
            let slots: Vec<_> = self.shared.slots.iter().map(|slot| slot.read()).collect();

            for (i, x) in buf.iter_mut().enumerate() {
                *x = slots[1..].iter().fold(slots[0][i], |acc, slot| op(acc, slot[i]));
            }
        });

        self.shared.barrier.wait()?;
        ret
    }

    fn check_root(&self, root: usize) -> Result<()> {
        if root >= self.ctx.world_size.get() {
            return Err(FmErr::InvalidParam {
                name: "broadcast root".to_string(),
                value: root.to_string(),
            });
        }
        Ok(())
    }
}

impl Collective for LocalCollective {
    fn context(&self) -> WorkerContext {
        self.ctx
    }

    fn reduce_sum_f64(&self, buf: &mut [f64]) -> Result<()> {
        self.all_reduce(buf, |a, b| a + b)
    }

    fn reduce_max_f64(&self, buf: &mut [f64]) -> Result<()> {
        self.all_reduce(buf, f64::max)
    }

    fn broadcast_f64(&self, buf: &mut [f64], root: usize) -> Result<()> {
        self.check_root(root)?;

        if self.ctx.rank == root {
            self.publish(buf);
        }
        self.shared.barrier.wait()?;

        let ret = {
            let slot = self.shared.slots[root].read();
            if slot.len() == buf.len() {
                buf.copy_from_slice(&slot);
                Ok(())
            } else {
                Err(FmErr::SizeMismatch {
                    what: "broadcast buffer",
                    got: buf.len(),
                    expected: slot.len(),
                })
            }
        };

        self.shared.barrier.wait()?;
        ret
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn run<T, F>(world_size: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(LocalCollective) -> T + Sync,
    {
        let group = local_group(NonZeroUsize::new(world_size).unwrap());
        thread::scope(|s| {
            let handles: Vec<_> = group
                .into_iter()
                .map(|member| s.spawn(|| f(member)))
                .collect();

            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn reduce_sum_and_max() {
        let results = run(4, |c| {
            let rank = c.context().rank as u64;
            let sum = c.reduce_sum_u64(rank + 1).unwrap();
            let max = c.reduce_max_u64(rank * 10).unwrap();
            (sum, max)
        });

        assert_eq!(results, vec![(10, 30); 4]);
    }

    #[test]
    fn reduce_sum_buffers_is_identical_on_every_rank() {
        let results = run(3, |c| {
            let rank = c.context().rank as f32;
            let mut buf = [0.1 * rank, 1.0, -rank];
            c.reduce_sum_f32(&mut buf).unwrap();
            buf
        });

        for buf in &results {
            assert_eq!(buf.map(f32::to_bits), results[0].map(f32::to_bits));
        }
        assert!((results[0][0] - 0.3).abs() < 1e-6);
        assert_eq!(results[0][1], 3.0);
        assert_eq!(results[0][2], -3.0);
    }

    #[test]
    fn broadcast_from_root() {
        let results = run(3, |c| {
            let mut buf = vec![c.context().rank as f32; 4];
            c.broadcast_f32(&mut buf, 2).unwrap();
            buf
        });

        assert_eq!(results, vec![vec![2.0; 4]; 3]);
    }

    #[test]
    fn mismatched_lengths_fail_on_every_rank() {
        let results = run(2, |c| {
            let mut buf = vec![1.0; c.context().rank + 1];
            c.reduce_sum_f64(&mut buf).is_err()
        });

        assert_eq!(results, [true, true]);
    }

    #[test]
    fn abort_releases_waiting_members() {
        let results = run(3, |c| {
            if c.context().rank == 1 {
                c.abort();
                return true;
            }

            matches!(c.reduce_sum_u64(1), Err(FmErr::Aborted))
        });

        assert_eq!(results, [true, true, true]);
    }

    #[test]
    fn consecutive_operations_do_not_interfere() {
        let results = run(3, |c| {
            (0..50)
                .map(|i| c.reduce_sum_u64(i).unwrap())
                .collect::<Vec<_>>()
        });

        let expected: Vec<u64> = (0..50).map(|i| 3 * i).collect();
        assert!(results.iter().all(|r| *r == expected));
    }
}

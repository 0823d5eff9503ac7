use std::{num::NonZeroUsize, ops::Range};

use crate::collective::WorkerContext;

/// Returns the rows of `total` owned by `rank` in a group of `world_size` workers.
///
/// The first `total % world_size` ranks get one extra row, so ranges are contiguous,
/// disjoint, cover `0..total` and differ in length by at most one.
///
/// # Panics
/// If `rank` is not smaller than `world_size`.
pub fn shard_range(total: usize, rank: usize, world_size: usize) -> Range<usize> {
    assert!(rank < world_size, "rank {rank} out of range for {world_size} workers");

    let (base, rem) = (total / world_size, total % world_size);
    let start = rank * base + rank.min(rem);
    let len = base + usize::from(rank < rem);

    start..start + len
}

/// The portion of a data source owned by a single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSpec {
    pub rank: usize,
    pub world_size: NonZeroUsize,
}

impl ShardSpec {
    /// # Panics
    /// If `rank` is not smaller than `world_size`.
    pub fn new(rank: usize, world_size: NonZeroUsize) -> Self {
        assert!(rank < world_size.get(), "rank out of range");
        Self { rank, world_size }
    }

    /// The whole source as a single shard.
    pub fn whole() -> Self {
        Self::new(0, NonZeroUsize::MIN)
    }

    /// The shard owned by the worker described by `ctx`.
    pub fn from_context(ctx: WorkerContext) -> Self {
        Self {
            rank: ctx.rank,
            world_size: ctx.world_size,
        }
    }

    #[inline]
    pub fn range(self, total: usize) -> Range<usize> {
        shard_range(total, self.rank, self.world_size.get())
    }
}

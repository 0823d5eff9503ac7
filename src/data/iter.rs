use std::num::NonZeroUsize;

use super::{RowBlock, ShardSpec};
use crate::Result;

/// A resettable source of row batches.
///
/// The batch returned by `current_batch` stays valid until the next `advance` or `reset`.
pub trait RowBlockIter: Send {
    /// Rewinds the iterator to the beginning of the shard.
    fn reset(&mut self) -> Result<()>;

    /// Moves to the next batch.
    ///
    /// # Returns
    /// Whether there is a new batch available.
    fn advance(&mut self) -> Result<bool>;

    /// Returns the batch the iterator is currently positioned at.
    fn current_batch(&self) -> &RowBlock;
}

/// Makes a full pass over `iter` and returns its `(num_col, num_rows)`.
///
/// `num_col` is one past the largest feature index seen, zero if there are no features.
/// The iterator is left exhausted.
pub fn scan_shard<I>(iter: &mut I) -> Result<(usize, usize)>
where
    I: RowBlockIter + ?Sized,
{
    let mut num_col = 0;
    let mut num_rows = 0;

    iter.reset()?;
    while iter.advance()? {
        let batch = iter.current_batch();
        num_rows += batch.len();

        if let Some(max) = batch.max_index() {
            num_col = num_col.max(max as usize + 1);
        }
    }

    Ok((num_col, num_rows))
}

/// An in-memory shard that yields its rows in fixed size batches.
#[derive(Debug, Clone)]
pub struct InMemoryShard {
    batches: Vec<RowBlock>,
    cursor: Option<usize>,
    empty: RowBlock,
}

impl InMemoryShard {
    /// Creates a new `InMemoryShard`.
    ///
    /// # Arguments
    /// * `rows` - Every row of the shard.
    /// * `batch_size` - The maximum amount of rows per batch.
    pub fn new(rows: &RowBlock, batch_size: NonZeroUsize) -> Self {
        let batch_size = batch_size.get();
        let batches = (0..rows.len())
            .step_by(batch_size)
            .map(|start| rows.slice(start..(start + batch_size).min(rows.len())))
            .collect();

        Self {
            batches,
            cursor: None,
            empty: RowBlock::new(),
        }
    }

    /// Creates the shard owned by `spec` out of a whole dataset.
    pub fn partition(rows: &RowBlock, spec: ShardSpec, batch_size: NonZeroUsize) -> Self {
        let range = spec.range(rows.len());
        Self::new(&rows.slice(range), batch_size)
    }

    /// Returns the total amount of rows in the shard.
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RowBlock::len).sum()
    }
}

impl RowBlockIter for InMemoryShard {
    fn reset(&mut self) -> Result<()> {
        self.cursor = None;
        Ok(())
    }

    fn advance(&mut self) -> Result<bool> {
        let next = self.cursor.map_or(0, |i| i + 1);
        self.cursor = Some(next.min(self.batches.len()));
        Ok(next < self.batches.len())
    }

    fn current_batch(&self) -> &RowBlock {
        self.cursor
            .and_then(|i| self.batches.get(i))
            .unwrap_or(&self.empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(n: usize) -> RowBlock {
        let mut rows = RowBlock::new();
        for i in 0..n {
            rows.push(i as f32, 1.0, [(i as u32, 1.0)]);
        }
        rows
    }

    #[test]
    fn batches_respect_batch_size_and_reset() {
        let mut shard = InMemoryShard::new(&dataset(5), NonZeroUsize::new(2).unwrap());
        assert_eq!(shard.num_rows(), 5);

        let mut sizes = Vec::new();
        while shard.advance().unwrap() {
            sizes.push(shard.current_batch().len());
        }
        assert_eq!(sizes, [2, 2, 1]);
        assert!(!shard.advance().unwrap());
        assert!(shard.current_batch().is_empty());

        shard.reset().unwrap();
        assert!(shard.advance().unwrap());
        assert_eq!(shard.current_batch().row(0).label, 0.0);
    }

    #[test]
    fn partition_takes_the_rank_range() {
        let rows = dataset(10);
        let spec = ShardSpec::new(1, NonZeroUsize::new(3).unwrap()); // 4..7
        let mut shard = InMemoryShard::partition(&rows, spec, NonZeroUsize::new(8).unwrap());

        assert!(shard.advance().unwrap());
        let labels: Vec<_> = shard.current_batch().rows().map(|r| r.label).collect();
        assert_eq!(labels, [4.0, 5.0, 6.0]);
    }

    #[test]
    fn scan_counts_columns_and_rows() {
        let mut shard = InMemoryShard::new(&dataset(4), NonZeroUsize::new(3).unwrap());
        assert_eq!(scan_shard(&mut shard).unwrap(), (4, 4));

        let mut empty = InMemoryShard::new(&RowBlock::new(), NonZeroUsize::MIN);
        assert_eq!(scan_shard(&mut empty).unwrap(), (0, 0));
    }
}

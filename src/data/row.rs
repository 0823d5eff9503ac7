use std::ops::Range;

/// A borrowed sparse row: feature indices and values plus a label and an importance weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Row<'a> {
    pub label: f32,
    pub weight: f32,
    pub index: &'a [u32],
    pub value: &'a [f32],
}

impl<'a> Row<'a> {
    /// Returns the amount of non-zero features in the row.
    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Iterates the `(feature_index, feature_value)` pairs in order.
    pub fn features(self) -> impl Iterator<Item = (u32, f32)> + 'a {
        self.index.iter().copied().zip(self.value.iter().copied())
    }
}

/// A batch of sparse rows stored in compressed sparse row layout.
///
/// The features of row `i` live at `offset[i]..offset[i + 1]` of `index` and `value`.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBlock {
    offset: Vec<usize>,
    label: Vec<f32>,
    weight: Vec<f32>,
    index: Vec<u32>,
    value: Vec<f32>,
}

impl Default for RowBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl RowBlock {
    /// Creates a new empty `RowBlock`.
    pub fn new() -> Self {
        Self {
            offset: vec![0],
            label: Vec::new(),
            weight: Vec::new(),
            index: Vec::new(),
            value: Vec::new(),
        }
    }

    /// Appends a row to the block.
    ///
    /// # Arguments
    /// * `label` - The row's label.
    /// * `weight` - The row's importance weight.
    /// * `features` - The `(feature_index, feature_value)` pairs of the row.
    pub fn push<I>(&mut self, label: f32, weight: f32, features: I)
    where
        I: IntoIterator<Item = (u32, f32)>,
    {
        for (index, value) in features {
            self.index.push(index);
            self.value.push(value);
        }

        self.label.push(label);
        self.weight.push(weight);
        self.offset.push(self.index.len());
    }

    /// Appends a copy of `row` to the block.
    pub fn push_row(&mut self, row: &Row<'_>) {
        self.push(row.label, row.weight, row.features());
    }

    /// Returns the amount of rows in the block.
    #[inline]
    pub fn len(&self) -> usize {
        self.label.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.label.is_empty()
    }

    /// Returns the `i`-th row of the block.
    ///
    /// # Panics
    /// If `i` is out of bounds.
    pub fn row(&self, i: usize) -> Row<'_> {
        let span = self.offset[i]..self.offset[i + 1];

        Row {
            label: self.label[i],
            weight: self.weight[i],
            index: &self.index[span.clone()],
            value: &self.value[span],
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        (0..self.len()).map(|i| self.row(i))
    }

    /// Copies the rows in `range` into a new block.
    pub fn slice(&self, range: Range<usize>) -> RowBlock {
        let mut block = RowBlock::new();
        for i in range {
            block.push_row(&self.row(i));
        }
        block
    }

    /// Removes every row, keeping the allocations.
    pub fn clear(&mut self) {
        self.offset.truncate(1);
        self.label.clear();
        self.weight.clear();
        self.index.clear();
        self.value.clear();
    }

    /// Returns the largest feature index in the block, if any.
    pub fn max_index(&self) -> Option<u32> {
        self.index.iter().copied().max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> RowBlock {
        let mut block = RowBlock::new();
        block.push(1.0, 1.0, [(0, 1.0), (2, 0.5)]);
        block.push(0.0, 2.0, []);
        block.push(1.0, 1.0, [(7, 3.0)]);
        block
    }

    #[test]
    fn rows_are_delimited_by_offsets() {
        let block = sample_block();
        assert_eq!(block.len(), 3);

        let row = block.row(0);
        assert_eq!(row.index, &[0, 2]);
        assert_eq!(row.value, &[1.0, 0.5]);

        let row = block.row(1);
        assert!(row.is_empty());
        assert_eq!(row.weight, 2.0);

        let row = block.row(2);
        assert_eq!(row.features().collect::<Vec<_>>(), vec![(7, 3.0)]);
        assert_eq!(block.max_index(), Some(7));
    }

    #[test]
    fn slice_and_clear() {
        let block = sample_block();
        let tail = block.slice(1..3);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail.row(1), block.row(2));

        let mut block = block;
        block.clear();
        assert!(block.is_empty());
        assert_eq!(block.max_index(), None);
        assert_eq!(block, RowBlock::new());
    }
}

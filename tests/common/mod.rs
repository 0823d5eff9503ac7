#![allow(dead_code)]

use std::{num::NonZeroUsize, thread};

use fm_lbfgs::{
    collective::{LocalCollective, local_group},
    data::RowBlock,
};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Random sparse rows over `ncol` columns, the last row always holds column `ncol - 1`.
pub fn dataset(nrow: usize, ncol: u32, seed: u64) -> RowBlock {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rows = RowBlock::new();

    for _ in 0..nrow {
        let nnz = rng.random_range(2..=4);
        let mut features: Vec<(u32, f32)> = (0..nnz)
            .map(|_| (rng.random_range(0..ncol), rng.random_range(0.5..1.5)))
            .collect();
        features.sort_by_key(|&(i, _)| i);
        features.dedup_by_key(|&mut (i, _)| i);

        let label = match features.iter().filter(|&&(i, _)| i % 2 == 0).count() {
            0 | 1 => 0.0,
            _ => 1.0,
        };
        rows.push(label, 1.0, features);
    }

    rows.push(1.0, 1.0, [(0, 1.0), (ncol - 1, 1.0)]);
    rows
}

/// Runs `f` on every member of an in-process group, one thread each, results in rank order.
pub fn run_group<T, F>(world_size: usize, f: F) -> Vec<T>
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

/// Writes `rows` as a libsvm file.
pub fn to_libsvm(rows: &RowBlock) -> String {
    let mut text = String::new();
    for row in rows.rows() {
        text.push_str(&row.label.to_string());
        for (i, v) in row.features() {
            text.push_str(&format!(" {i}:{v}"));
        }
        text.push('\n');
    }
    text
}

//! Margin and gradient of the factorization machine for a single row.
//!
//! Both functions run in `O(k * L)` for `k` factors and `L` active features, using
//! `sum_{i<j} <v_i, v_j> x_i x_j = 0.5 * sum_l [(sum_j x_j v_jl)^2 - sum_j x_j^2 v_jl^2]`.
//! Features with an index outside of `[0, num_feature)` are ignored.

use super::ModelParam;
use crate::data::Row;

#[inline]
fn active<'a>(row: Row<'a>, num_feature: usize) -> impl Iterator<Item = (usize, f64)> + 'a {
    row.features()
        .map(|(j, x)| (j as usize, x as f64))
        .filter(move |&(j, _)| j < num_feature)
}

/// Computes the margin of `row`: the bias prior plus the pairwise interaction term.
///
/// # Arguments
/// * `param` - The model's hyperparameters.
/// * `weight` - The factor weights, `weight[j * nfactor + l]` for feature `j` and factor `l`.
/// * `row` - The row to predict.
pub fn predict_margin(param: &ModelParam, weight: &[f32], row: &Row<'_>) -> f32 {
    let k = param.nfactor();
    let num_feature = param.num_feature();
    let mut margin = param.base_margin as f64;

    for l in 0..k {
        let mut sum = 0.0;
        let mut sum_sqr = 0.0;

        for (j, x) in active(*row, num_feature) {
            let xv = x * weight[j * k + l] as f64;
            sum += xv;
            sum_sqr += xv * xv;
        }

        margin += 0.5 * (sum * sum - sum_sqr);
    }

    margin as f32
}

/// Adds the gradient contribution of `row` to `out`.
///
/// For every active feature `j` and factor `l` the contribution is
/// `x_j * (sum_j' x_j' v_j'l - x_j v_jl) * grad`, the sum over the co-occurring features
/// excluding `j` itself.
///
/// # Arguments
/// * `param` - The model's hyperparameters.
/// * `weight` - The factor weights.
/// * `row` - The row whose contribution gets accumulated.
/// * `grad` - The derivative of the loss with respect to the row's margin, times its weight.
/// * `out` - The gradient accumulator, laid out like `weight`.
pub fn accumulate_grad(param: &ModelParam, weight: &[f32], row: &Row<'_>, grad: f32, out: &mut [f32]) {
    let k = param.nfactor();
    let num_feature = param.num_feature();
    let grad = grad as f64;

    for l in 0..k {
        let sumxf: f64 = active(*row, num_feature)
            .map(|(j, x)| x * weight[j * k + l] as f64)
            .sum();

        for (j, x) in active(*row, num_feature) {
            let n = j * k + l;
            out[n] += (x * (sumxf - weight[n] as f64 * x) * grad) as f32;
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;
    use crate::data::RowBlock;

    fn param(num_feature: u64, nfactor: u32) -> ModelParam {
        let mut param = ModelParam::default();
        param.num_feature = num_feature;
        param.nfactor = nfactor;
        param.update_num_weight();
        param
    }

    // d(margin)/d(v_jl) by explicitly enumerating the feature pairs.
    fn pairwise_grad(param: &ModelParam, weight: &[f32], row: &Row<'_>, grad: f32) -> Vec<f32> {
        let k = param.nfactor();
        let mut out = vec![0.0f32; param.num_weight()];

        for (a, (ja, xa)) in row.features().enumerate() {
            for l in 0..k {
                let mut acc = 0.0f64;
                for (b, (jb, xb)) in row.features().enumerate() {
                    if a != b {
                        acc += xb as f64 * weight[jb as usize * k + l] as f64;
                    }
                }
                out[ja as usize * k + l] += (xa as f64 * acc * grad as f64) as f32;
            }
        }

        out
    }

    fn pairwise_margin(param: &ModelParam, weight: &[f32], row: &Row<'_>) -> f32 {
        let k = param.nfactor();
        let feats: Vec<_> = row.features().collect();
        let mut margin = param.base_margin as f64;

        for a in 0..feats.len() {
            for b in a + 1..feats.len() {
                let (ja, xa) = feats[a];
                let (jb, xb) = feats[b];
                let dot: f64 = (0..k)
                    .map(|l| weight[ja as usize * k + l] as f64 * weight[jb as usize * k + l] as f64)
                    .sum();
                margin += dot * xa as f64 * xb as f64;
            }
        }

        margin as f32
    }

    #[test]
    fn margin_of_two_features() {
        let param = param(3, 2);
        let weight = [0.1, 0.2, 0.0, 0.0, 0.3, 0.4];

        let mut block = RowBlock::new();
        block.push(1.0, 1.0, [(0, 1.0), (2, 1.0)]);

        let margin = predict_margin(&param, &weight, &block.row(0));
        assert!((margin - 0.11).abs() < 1e-6);
    }

    #[test]
    fn empty_row_is_bias_only() {
        let mut param = param(3, 2);
        param.base_margin = 0.25;
        let weight = [1.0; 6];

        let mut block = RowBlock::new();
        block.push(1.0, 1.0, []);
        let row = block.row(0);

        assert_eq!(predict_margin(&param, &weight, &row), 0.25);

        let mut out = vec![0.0; 6];
        accumulate_grad(&param, &weight, &row, 1.0, &mut out);
        assert_eq!(out, vec![0.0; 6]);
    }

    #[test]
    fn single_feature_has_no_interaction() {
        let param = param(2, 3);
        let weight = [0.5; 6];

        let mut block = RowBlock::new();
        block.push(1.0, 1.0, [(1, 2.0)]);
        let row = block.row(0);

        assert_eq!(predict_margin(&param, &weight, &row), 0.0);

        let mut out = vec![0.0; 6];
        accumulate_grad(&param, &weight, &row, 1.0, &mut out);
        assert_eq!(out, vec![0.0; 6]);
    }

    #[test]
    fn matches_pairwise_enumeration() {
        let mut rng = StdRng::seed_from_u64(7);
        let param = param(20, 5);
        let weight: Vec<f32> = (0..param.num_weight())
            .map(|_| rng.random_range(-1.0..1.0))
            .collect();

        for _ in 0..50 {
            let nnz = rng.random_range(0..8);
            let mut indices: Vec<u32> = (0..20).collect();
            for i in 0..nnz {
                let j = rng.random_range(i..20);
                indices.swap(i, j);
            }

            let mut block = RowBlock::new();
            block.push(
                1.0,
                1.0,
                indices[..nnz]
                    .iter()
                    .map(|&j| (j, rng.random_range(-2.0..2.0))),
            );
            let row = block.row(0);
            let grad = rng.random_range(-1.0..1.0);

            let margin = predict_margin(&param, &weight, &row);
            assert!((margin - pairwise_margin(&param, &weight, &row)).abs() < 1e-4);

            let mut out = vec![0.0; param.num_weight()];
            accumulate_grad(&param, &weight, &row, grad, &mut out);

            for (fast, slow) in out.iter().zip(pairwise_grad(&param, &weight, &row, grad)) {
                assert!((fast - slow).abs() < 1e-4, "{fast} != {slow}");
            }
        }
    }

    #[test]
    fn accumulates_instead_of_overwriting() {
        let param = param(2, 1);
        let weight = [1.0, 2.0];

        let mut block = RowBlock::new();
        block.push(1.0, 1.0, [(0, 1.0), (1, 1.0)]);
        let row = block.row(0);

        let mut out = vec![0.0; 2];
        accumulate_grad(&param, &weight, &row, 1.0, &mut out);
        assert_eq!(out, [2.0, 1.0]);
        accumulate_grad(&param, &weight, &row, 0.5, &mut out);
        assert_eq!(out, [3.0, 1.5]);
    }

    #[test]
    fn ignores_unknown_columns() {
        let param = param(2, 1);
        let weight = [1.0, 2.0];

        let mut block = RowBlock::new();
        block.push(1.0, 1.0, [(0, 1.0), (1, 1.0), (5, 1.0)]);
        let row = block.row(0);

        assert_eq!(predict_margin(&param, &weight, &row), 2.0);
    }
}

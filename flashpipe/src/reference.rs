//! Full-materialization attention in f32, used as the correctness oracle.

use std::f32::consts::LOG2_E;

use ndarray::{Array1, Array2, Array3, Array4, Axis, Ix4, s};
use rayon::prelude::*;

use crate::{
    Array,
    attention::{AttentionError, TensorDims},
};

/// Absolute tolerance kernel outputs meet against the oracle, for f16 and bf16.
pub const ATOL: f32 = 2e-3;
/// Relative tolerance paired with [`ATOL`].
pub const RTOL: f32 = 1e-3;

#[derive(Debug, Clone)]
pub struct ReferenceOutput {
    /// f32 `[batch, q_len, q_heads, head_dim]`.
    pub out: Array,
    /// f32 `[batch, q_heads, q_len]` base-2 log-sum-exp, when requested.
    pub lse: Option<Array>,
}

/// Softmax attention over q `[batch, q_len, q_heads, head_dim]` and k/v
/// `[batch, kv_len, kv_heads, head_dim]`, without score scaling. Query head
/// `h` attends to kv head `h / (q_heads / kv_heads)`.
pub fn attention_reference(
    q: &Array,
    k: &Array,
    v: &Array,
    save_residuals: bool,
) -> Result<ReferenceOutput, AttentionError> {
    let dims = TensorDims::new(q, k, v)?;
    let heads_per_kv_head = dims.heads_per_kv_head();
    let queries = widen(q);
    let keys = widen(k);
    let values = widen(v);

    let heads: Vec<(Array2<f32>, Array1<f32>)> = (0..dims.batch_size * dims.num_q_heads)
        .into_par_iter()
        .map(|index| {
            let batch = index / dims.num_q_heads;
            let q_head = index % dims.num_q_heads;
            let kv_head = q_head / heads_per_kv_head;
            head_attention(
                queries.slice(s![batch, .., q_head, ..]),
                keys.slice(s![batch, .., kv_head, ..]),
                values.slice(s![batch, .., kv_head, ..]),
            )
        })
        .collect();

    let mut out = Array4::<f32>::zeros((dims.batch_size, dims.q_seq_len, dims.num_q_heads, dims.head_dim));
    let mut lse = Array3::<f32>::zeros((dims.batch_size, dims.num_q_heads, dims.q_seq_len));
    for (index, (head_out, head_lse)) in heads.into_iter().enumerate() {
        let batch = index / dims.num_q_heads;
        let q_head = index % dims.num_q_heads;
        out.slice_mut(s![batch, .., q_head, ..]).assign(&head_out);
        lse.slice_mut(s![batch, q_head, ..]).assign(&head_lse);
    }

    Ok(ReferenceOutput {
        out: Array::from_view(out.view(), "reference_out"),
        lse: save_residuals.then(|| Array::from_view(lse.view(), "reference_lse")),
    })
}

/// Largest `|actual - expected| - rtol * |expected|` over all elements. The
/// arrays are close when this does not exceed the absolute tolerance.
pub fn max_violation(
    actual: &Array,
    expected: &Array,
    rtol: f32,
) -> f32 {
    assert_eq!(actual.shape(), expected.shape(), "Shapes differ for {} and {}", actual.label(), expected.label());
    let actual = actual.to_ndarray::<f32>();
    let expected = expected.to_ndarray::<f32>();
    actual
        .iter()
        .zip(expected.iter())
        .map(|(a, e)| (a - e).abs() - rtol * e.abs())
        .fold(f32::NEG_INFINITY, f32::max)
}

fn widen(array: &Array) -> Array4<f32> {
    array.to_ndarray::<f32>().into_dimensionality::<Ix4>().expect("Rank is validated")
}

fn head_attention(
    queries: ndarray::ArrayView2<'_, f32>,
    keys: ndarray::ArrayView2<'_, f32>,
    values: ndarray::ArrayView2<'_, f32>,
) -> (Array2<f32>, Array1<f32>) {
    let mut scores = queries.dot(&keys.t());
    let max = scores.map_axis(Axis(1), |row| row.fold(f32::NEG_INFINITY, |max, &score| max.max(score)));
    for (mut row, &max) in scores.rows_mut().into_iter().zip(max.iter()) {
        row.mapv_inplace(|score| (score - max).exp());
    }
    let sum = scores.sum_axis(Axis(1));

    let mut out = scores.dot(&values);
    for (mut row, &sum) in out.rows_mut().into_iter().zip(sum.iter()) {
        row.mapv_inplace(|value| value / sum);
    }
    let lse = ndarray::Zip::from(&max).and(&sum).map_collect(|&max, &sum| max * LOG2_E + sum.log2());
    (out, lse)
}

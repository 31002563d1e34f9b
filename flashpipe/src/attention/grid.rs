use log::trace;
use ndarray::{ArrayView2, ArrayView4, ArrayViewMut1, ArrayViewMut2, Ix4, s};
use rayon::prelude::*;

use super::{AttentionOutput, AttentionProblem, problem::COMPUTE_GROUPS};
use crate::{Array, KernelElement};

/// Global memory one compute group reads its queries from and writes its
/// results to.
pub struct GroupIo<'a, T> {
    pub index: usize,
    /// `[block_q, head_dim]` rows of the query tensor.
    pub query: ArrayView2<'a, T>,
    pub out: ArrayViewMut2<'a, T>,
    pub lse: Option<ArrayViewMut1<'a, f32>>,
}

/// One (batch, query super-tile, head) kernel instance.
pub struct Instance<'a, T> {
    /// `[kv_len, head_dim]` keys and values of the matching kv head.
    pub keys: ArrayView2<'a, T>,
    pub values: ArrayView2<'a, T>,
    pub groups: [GroupIo<'a, T>; COMPUTE_GROUPS],
}

/// Runs `kernel` on every instance of the grid in parallel.
///
/// Instances write into disjoint head-major scratch regions, which are
/// permuted into the `[batch, q_len, heads, head_dim]` output afterwards.
pub fn launch<T, K>(
    problem: &AttentionProblem,
    q: &Array,
    k: &Array,
    v: &Array,
    save_residuals: bool,
    kernel: K,
) -> AttentionOutput
where
    T: KernelElement,
    K: Fn(Instance<'_, T>) + Sync,
{
    let q = q.as_view::<T>().into_dimensionality::<Ix4>().expect("Query rank is validated");
    let k = k.as_view::<T>().into_dimensionality::<Ix4>().expect("Key rank is validated");
    let v = v.as_view::<T>().into_dimensionality::<Ix4>().expect("Value rank is validated");

    let AttentionProblem {
        batch_size,
        q_seq_len,
        num_q_heads,
        head_dim,
        block_q,
        ..
    } = *problem;
    let num_q_tiles = problem.num_q_tiles();
    let super_tile = COMPUTE_GROUPS * block_q;

    let mut out_scratch = vec![T::zero(); batch_size * num_q_heads * q_seq_len * head_dim];
    let mut lse_scratch = save_residuals.then(|| vec![0.0f32; batch_size * num_q_heads * q_seq_len]);
    let lse_chunks: Vec<Option<&mut [f32]>> = match lse_scratch.as_deref_mut() {
        Some(lse) => lse.chunks_mut(super_tile).map(Some).collect(),
        None => (0..problem.num_instances()).map(|_| None).collect(),
    };

    out_scratch.par_chunks_mut(super_tile * head_dim).zip(lse_chunks).enumerate().for_each(
        |(index, (out_chunk, lse_chunk))| {
            let q_tile = index % num_q_tiles;
            let head = (index / num_q_tiles) % num_q_heads;
            let batch = index / (num_q_tiles * num_q_heads);
            let kv_head = problem.kv_head(head);
            trace!("Instance batch={batch} q_tile={q_tile} head={head} kv_head={kv_head}");

            let mut out_parts = out_chunk.chunks_mut(block_q * head_dim);
            let mut lse_parts = lse_chunk.map(|lse| lse.chunks_mut(block_q));
            let groups = std::array::from_fn(|group| {
                let row = q_tile * super_tile + group * block_q;
                let out = out_parts.next().expect("Chunk holds one tile per compute group");
                GroupIo {
                    index: group,
                    query: q.slice(s![batch, row..row + block_q, head, ..]),
                    out: ArrayViewMut2::from_shape((block_q, head_dim), out).expect("Chunk holds one query tile"),
                    lse: lse_parts.as_mut().map(|parts| {
                        ArrayViewMut1::from(parts.next().expect("Chunk holds one row block per compute group"))
                    }),
                }
            });

            kernel(Instance {
                keys: k.slice(s![batch, .., kv_head, ..]),
                values: v.slice(s![batch, .., kv_head, ..]),
                groups,
            });
        },
    );

    let scratch = ArrayView4::from_shape((batch_size, num_q_heads, q_seq_len, head_dim), &out_scratch)
        .expect("Scratch is sized to the output");
    AttentionOutput {
        out: Array::from_view(scratch.permuted_axes([0, 2, 1, 3]), "attention_out"),
        lse: lse_scratch.map(|lse| Array::from_slice(&[batch_size, num_q_heads, q_seq_len], &lse, "attention_lse")),
    }
}

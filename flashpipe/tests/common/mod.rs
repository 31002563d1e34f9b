#![allow(dead_code)]

use flashpipe::{Array, KernelElement, max_violation};
use ndarray::Array4;
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Uniform values in `[-0.5, 0.5)`, rounded to `T`.
pub fn random_array<T: KernelElement>(
    shape: [usize; 4],
    seed: u64,
    label: &str,
) -> Array {
    let mut rng = StdRng::seed_from_u64(seed);
    let values = Array4::from_shape_fn(shape, |_| T::narrow(rng.random_range(-0.5..0.5)));
    Array::from_view(values.view(), label)
}

/// q `[batch, q_len, q_heads, head_dim]` and k/v `[batch, kv_len, kv_heads, head_dim]`.
pub fn random_qkv<T: KernelElement>(
    batch_size: usize,
    q_seq_len: usize,
    kv_seq_len: usize,
    num_q_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
    seed: u64,
) -> (Array, Array, Array) {
    (
        random_array::<T>([batch_size, q_seq_len, num_q_heads, head_dim], seed, "q"),
        random_array::<T>([batch_size, kv_seq_len, num_kv_heads, head_dim], seed + 1, "k"),
        random_array::<T>([batch_size, kv_seq_len, num_kv_heads, head_dim], seed + 2, "v"),
    )
}

pub fn assert_allclose(
    actual: &Array,
    expected: &Array,
    atol: f32,
    rtol: f32,
    name: &str,
) {
    let violation = max_violation(actual, expected, rtol);
    println!("{name}: max violation {violation:e} (atol {atol:e}, rtol {rtol:e})");
    assert!(violation <= atol, "{name} differs from reference: {violation} > atol {atol}");
}

pub fn max_abs_difference(
    a: &Array,
    b: &Array,
) -> f32 {
    let a = a.to_ndarray::<f32>();
    let b = b.to_ndarray::<f32>();
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
}

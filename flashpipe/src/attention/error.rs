use thiserror::Error;

use crate::DataType;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AttentionError {
    #[error("q, k, and v should all be 4D, got: q.ndim={q}, k.ndim={k}, v.ndim={v}")]
    Rank {
        q: usize,
        k: usize,
        v: usize,
    },
    #[error("Expected {tensor}.shape={got:?} to be {expected:?} (inferred from q)")]
    ShapeMismatch {
        tensor: &'static str,
        expected: [usize; 4],
        got: Vec<usize>,
    },
    #[error("q, k, and v should all have the same dtype, got: {q}, {k}, {v}")]
    DataTypeMismatch {
        q: DataType,
        k: DataType,
        v: DataType,
    },
    #[error("num_q_heads={q_heads} must be divisible by num_kv_heads={kv_heads}")]
    HeadCount {
        q_heads: usize,
        kv_heads: usize,
    },
    #[error("head_dim={0} must be divisible by 64")]
    HeadDim(usize),
    #[error("Only f16 and bf16 are supported, got dtype: {0}")]
    UnsupportedDataType(DataType),
    #[error("kv_seq_len={kv_seq_len} must be a positive multiple of block_kv={block_kv}")]
    KvSeqLen {
        kv_seq_len: usize,
        block_kv: usize,
    },
    #[error("q_seq_len={q_seq_len} must be a multiple of 2 * block_q={super_tile}")]
    QSeqLen {
        q_seq_len: usize,
        super_tile: usize,
    },
    #[error("Requested {requested} bytes of shared memory, which exceeds available shared memory ({available} bytes)")]
    SharedMemoryExhausted {
        requested: usize,
        available: usize,
    },
}

impl AttentionError {
    /// Configurations that are valid but do not fit the device. Tuning sweeps
    /// skip these instead of failing.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, AttentionError::SharedMemoryExhausted { .. })
    }
}

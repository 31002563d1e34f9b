use super::AttentionError;
use crate::{Array, DataType, config::TuningConfig};

const HEAD_DIM_GRANULARITY: usize = 64;

/// Number of compute thread groups per kernel instance. Each owns one
/// `block_q` half of a query super-tile.
pub const COMPUTE_GROUPS: usize = 2;

/// Dimensions of mutually consistent q, k and v tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorDims {
    pub batch_size: usize,
    pub q_seq_len: usize,
    pub kv_seq_len: usize,
    pub num_q_heads: usize,
    pub num_kv_heads: usize,
    pub head_dim: usize,
    pub data_type: DataType,
}

impl TensorDims {
    /// Checks rank, the k/v shapes inferred from q, data types and the head
    /// grouping. The first violation is reported.
    pub fn new(
        q: &Array,
        k: &Array,
        v: &Array,
    ) -> Result<Self, AttentionError> {
        if q.rank() != 4 || k.rank() != 4 || v.rank() != 4 {
            return Err(AttentionError::Rank {
                q: q.rank(),
                k: k.rank(),
                v: v.rank(),
            });
        }

        let [batch_size, q_seq_len, num_q_heads, head_dim] = dims(q);
        let [_, kv_seq_len, num_kv_heads, _] = dims(k);
        let kv_shape = [batch_size, kv_seq_len, num_kv_heads, head_dim];
        for (tensor, array) in [("k", k), ("v", v)] {
            if array.shape() != kv_shape {
                return Err(AttentionError::ShapeMismatch {
                    tensor,
                    expected: kv_shape,
                    got: array.shape().to_vec(),
                });
            }
        }

        let data_type = q.data_type();
        if k.data_type() != data_type || v.data_type() != data_type {
            return Err(AttentionError::DataTypeMismatch {
                q: data_type,
                k: k.data_type(),
                v: v.data_type(),
            });
        }
        if num_kv_heads == 0 || num_q_heads % num_kv_heads != 0 {
            return Err(AttentionError::HeadCount {
                q_heads: num_q_heads,
                kv_heads: num_kv_heads,
            });
        }

        Ok(Self {
            batch_size,
            q_seq_len,
            kv_seq_len,
            num_q_heads,
            num_kv_heads,
            head_dim,
            data_type,
        })
    }

    pub fn heads_per_kv_head(&self) -> usize {
        self.num_q_heads / self.num_kv_heads
    }
}

/// Validated attention problem shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttentionProblem {
    pub batch_size: usize,
    pub q_seq_len: usize,
    pub kv_seq_len: usize,
    pub num_q_heads: usize,
    pub num_kv_heads: usize,
    pub head_dim: usize,
    pub data_type: DataType,
    pub block_q: usize,
    pub block_kv: usize,
    pub depth: usize,
}

impl AttentionProblem {
    /// Checks q `[batch, q_len, q_heads, head_dim]` and k/v
    /// `[batch, kv_len, kv_heads, head_dim]` against each other and the
    /// configuration. The first violation is reported.
    pub fn new(
        q: &Array,
        k: &Array,
        v: &Array,
        config: &TuningConfig,
    ) -> Result<Self, AttentionError> {
        let TensorDims {
            batch_size,
            q_seq_len,
            kv_seq_len,
            num_q_heads,
            num_kv_heads,
            head_dim,
            data_type,
        } = TensorDims::new(q, k, v)?;

        if head_dim % HEAD_DIM_GRANULARITY != 0 {
            return Err(AttentionError::HeadDim(head_dim));
        }
        if !data_type.is_reduced_precision_float() {
            return Err(AttentionError::UnsupportedDataType(data_type));
        }

        let block_q = config.block_q();
        let block_kv = config.block_kv();
        if kv_seq_len == 0 || kv_seq_len % block_kv != 0 {
            return Err(AttentionError::KvSeqLen {
                kv_seq_len,
                block_kv,
            });
        }
        let super_tile = COMPUTE_GROUPS * block_q;
        if q_seq_len % super_tile != 0 {
            return Err(AttentionError::QSeqLen {
                q_seq_len,
                super_tile,
            });
        }

        Ok(Self {
            batch_size,
            q_seq_len,
            kv_seq_len,
            num_q_heads,
            num_kv_heads,
            head_dim,
            data_type,
            block_q,
            block_kv,
            depth: config.pipeline_depth(kv_seq_len),
        })
    }

    pub fn heads_per_kv_head(&self) -> usize {
        self.num_q_heads / self.num_kv_heads
    }

    pub fn kv_head(
        &self,
        q_head: usize,
    ) -> usize {
        q_head / self.heads_per_kv_head()
    }

    /// Query super-tiles of `COMPUTE_GROUPS * block_q` rows per head.
    pub fn num_q_tiles(&self) -> usize {
        self.q_seq_len / (COMPUTE_GROUPS * self.block_q)
    }

    pub fn num_kv_steps(&self) -> usize {
        self.kv_seq_len / self.block_kv
    }

    /// Kernel instances in the (batch, q tile, head) grid.
    pub fn num_instances(&self) -> usize {
        self.batch_size * self.num_q_tiles() * self.num_q_heads
    }

    /// Floating point operations of both matmuls, `4 * q * kv * d * h * b`.
    pub fn matmul_flops(&self) -> f64 {
        4.0 * self.q_seq_len as f64
            * self.kv_seq_len as f64
            * self.head_dim as f64
            * self.num_q_heads as f64
            * self.batch_size as f64
    }
}

fn dims(array: &Array) -> [usize; 4] {
    let shape = array.shape();
    [shape[0], shape[1], shape[2], shape[3]]
}

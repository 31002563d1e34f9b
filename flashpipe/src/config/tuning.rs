use serde::{Deserialize, Serialize};

use super::ConfigError;

const TILE_GRANULARITY: usize = 64;

/// Where the running-sum update sits relative to the end-of-softmax barriers.
///
/// Both orderings compute the same values; they only move the row-sum
/// reduction before or after the hand-off to the other compute group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftmaxOrdering {
    SumBeforeBarrier,
    BarrierBeforeSum,
}

impl SoftmaxOrdering {
    /// Empirically faster choice per head dimension.
    pub fn for_head_dim(head_dim: usize) -> Self {
        if head_dim <= 128 {
            SoftmaxOrdering::SumBeforeBarrier
        } else {
            SoftmaxOrdering::BarrierBeforeSum
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTuningConfig", into = "RawTuningConfig")]
pub struct TuningConfig {
    block_q: usize,
    block_kv: usize,
    max_concurrent_steps: usize,
    use_schedule_barrier: bool,
    softmax_ordering: Option<SoftmaxOrdering>,
}

impl TuningConfig {
    pub fn new(
        block_q: usize,
        block_kv: usize,
        max_concurrent_steps: usize,
    ) -> Result<Self, ConfigError> {
        if block_q == 0 || block_q % TILE_GRANULARITY != 0 {
            return Err(ConfigError::BlockQ(block_q));
        }
        if block_kv == 0 || block_kv % TILE_GRANULARITY != 0 {
            return Err(ConfigError::BlockKv(block_kv));
        }
        if max_concurrent_steps < 2 {
            return Err(ConfigError::MaxConcurrentSteps(max_concurrent_steps));
        }
        Ok(Self {
            block_q,
            block_kv,
            max_concurrent_steps,
            use_schedule_barrier: true,
            softmax_ordering: None,
        })
    }

    pub fn with_schedule_barrier(
        self,
        use_schedule_barrier: bool,
    ) -> Self {
        Self {
            use_schedule_barrier,
            ..self
        }
    }

    pub fn with_softmax_ordering(
        self,
        softmax_ordering: SoftmaxOrdering,
    ) -> Self {
        Self {
            softmax_ordering: Some(softmax_ordering),
            ..self
        }
    }

    pub fn block_q(&self) -> usize {
        self.block_q
    }

    pub fn block_kv(&self) -> usize {
        self.block_kv
    }

    pub fn max_concurrent_steps(&self) -> usize {
        self.max_concurrent_steps
    }

    pub fn use_schedule_barrier(&self) -> bool {
        self.use_schedule_barrier
    }

    /// The explicitly requested ordering, falling back to the head-dimension
    /// heuristic.
    pub fn softmax_ordering(
        &self,
        head_dim: usize,
    ) -> SoftmaxOrdering {
        self.softmax_ordering.unwrap_or_else(|| SoftmaxOrdering::for_head_dim(head_dim))
    }

    /// Number of key/value slots actually allocated for a sequence.
    pub fn pipeline_depth(
        &self,
        kv_seq_len: usize,
    ) -> usize {
        self.max_concurrent_steps.min(kv_seq_len / self.block_kv)
    }
}

#[derive(Serialize, Deserialize)]
struct RawTuningConfig {
    block_q: usize,
    block_kv: usize,
    max_concurrent_steps: usize,
    #[serde(default = "default_use_schedule_barrier")]
    use_schedule_barrier: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    softmax_ordering: Option<SoftmaxOrdering>,
}

fn default_use_schedule_barrier() -> bool {
    true
}

impl TryFrom<RawTuningConfig> for TuningConfig {
    type Error = ConfigError;

    fn try_from(raw: RawTuningConfig) -> Result<Self, Self::Error> {
        let config = TuningConfig::new(raw.block_q, raw.block_kv, raw.max_concurrent_steps)?
            .with_schedule_barrier(raw.use_schedule_barrier);
        Ok(match raw.softmax_ordering {
            Some(ordering) => config.with_softmax_ordering(ordering),
            None => config,
        })
    }
}

impl From<TuningConfig> for RawTuningConfig {
    fn from(config: TuningConfig) -> Self {
        Self {
            block_q: config.block_q,
            block_kv: config.block_kv,
            max_concurrent_steps: config.max_concurrent_steps,
            use_schedule_barrier: config.use_schedule_barrier,
            softmax_ordering: config.softmax_ordering,
        }
    }
}

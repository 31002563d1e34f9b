use super::{AttentionError, AttentionProblem, problem::COMPUTE_GROUPS};

const BARRIER_SIZE: usize = 8;

/// On-chip footprint of one kernel instance, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedMemoryPlan {
    pub query_staging: usize,
    pub key_slots: usize,
    pub value_slots: usize,
    pub residual_staging: usize,
    pub barriers: usize,
}

impl SharedMemoryPlan {
    pub fn new(
        problem: &AttentionProblem,
        save_residuals: bool,
    ) -> Self {
        let element_size = problem.data_type.size_in_bytes();
        let tile = problem.block_kv * problem.head_dim * element_size;
        let residual_staging = if save_residuals {
            COMPUTE_GROUPS * problem.block_q * std::mem::size_of::<f32>()
        } else {
            0
        };
        // ready and consumed per slot for keys and values, plus query-ready per
        // group and the schedule barrier
        let num_barriers = 4 * problem.depth + COMPUTE_GROUPS + 1;

        Self {
            query_staging: COMPUTE_GROUPS * problem.block_q * problem.head_dim * element_size,
            key_slots: problem.depth * tile,
            value_slots: problem.depth * tile,
            residual_staging,
            barriers: num_barriers * BARRIER_SIZE,
        }
    }

    pub fn total(&self) -> usize {
        self.query_staging + self.key_slots + self.value_slots + self.residual_staging + self.barriers
    }

    pub fn check(
        &self,
        available: usize,
    ) -> Result<(), AttentionError> {
        let requested = self.total();
        if requested > available {
            return Err(AttentionError::SharedMemoryExhausted {
                requested,
                available,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Array, DataType, backends::cpu::DEFAULT_SHARED_MEMORY_CAPACITY, config::TuningConfig};

    fn plan(
        head_dim: usize,
        block_kv: usize,
        save_residuals: bool,
    ) -> SharedMemoryPlan {
        let config = TuningConfig::new(64, block_kv, 2).unwrap();
        let q = Array::zeros(&[1, 128, 1, head_dim], DataType::F16, "q");
        let kv = Array::zeros(&[1, 1024, 1, head_dim], DataType::F16, "kv");
        let problem = AttentionProblem::new(&q, &kv, &kv, &config).unwrap();
        SharedMemoryPlan::new(&problem, save_residuals)
    }

    #[test]
    fn counts_every_buffer() {
        let plan = plan(128, 128, true);
        assert_eq!(plan.query_staging, 2 * 64 * 128 * 2);
        assert_eq!(plan.key_slots, 2 * 128 * 128 * 2);
        assert_eq!(plan.value_slots, plan.key_slots);
        assert_eq!(plan.residual_staging, 2 * 64 * 4);
        assert_eq!(plan.barriers, 11 * 8);
        assert_eq!(plan.total(), 32_768 + 2 * 65_536 + 512 + 88);
    }

    #[test]
    fn large_key_tiles_exhaust_default_capacity() {
        assert!(plan(128, 128, false).check(DEFAULT_SHARED_MEMORY_CAPACITY).is_ok());

        let error = plan(128, 256, false).check(DEFAULT_SHARED_MEMORY_CAPACITY).unwrap_err();
        assert!(error.is_resource_exhausted());
        assert!(error.to_string().contains("exceeds available shared memory"));
    }
}

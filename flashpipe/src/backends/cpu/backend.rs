use ndarray::{ArrayView, ArrayView2, ArrayViewMut, ArrayViewMut2, Dimension};

use super::{CpuBarrier, matmul};
use crate::{
    KernelElement,
    backends::common::{Backend, Barrier, PendingWrites},
};

/// Per-instance on-chip memory of a Hopper-class device (227 KiB).
pub const DEFAULT_SHARED_MEMORY_CAPACITY: usize = 232_448;

/// Host backend: thread groups are OS threads, shared memory is host memory
/// and every copy completes before it returns.
#[derive(Debug, Clone)]
pub struct Cpu {
    shared_memory_capacity: usize,
}

impl Cpu {
    pub fn new() -> Self {
        Self {
            shared_memory_capacity: DEFAULT_SHARED_MEMORY_CAPACITY,
        }
    }

    pub fn with_shared_memory_capacity(
        self,
        shared_memory_capacity: usize,
    ) -> Self {
        Self {
            shared_memory_capacity,
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for Cpu {
    type Barrier = CpuBarrier;

    fn name(&self) -> &str {
        "cpu"
    }

    fn shared_memory_capacity(&self) -> usize {
        self.shared_memory_capacity
    }

    fn create_barrier(
        &self,
        num_arrivals: usize,
        label: &str,
    ) -> CpuBarrier {
        CpuBarrier::new(num_arrivals, label)
    }

    fn matmul_accumulate<T: KernelElement>(
        &self,
        acc: ArrayViewMut2<'_, f32>,
        lhs: ArrayView2<'_, T>,
        rhs: ArrayView2<'_, T>,
    ) {
        matmul::accumulate(acc, lhs, rhs);
    }

    fn copy_to_shared<T: KernelElement>(
        &self,
        src: ArrayView2<'_, T>,
        mut dst: ArrayViewMut2<'_, T>,
        barrier: &CpuBarrier,
    ) {
        dst.assign(&src);
        barrier.arrive();
    }

    fn copy_to_global<T: Copy, D: Dimension>(
        &self,
        src: ArrayView<'_, T, D>,
        mut dst: ArrayViewMut<'_, T, D>,
        pending: &mut PendingWrites,
    ) {
        dst.assign(&src);
        pending.issue();
    }

    fn wait_for_writes(
        &self,
        pending: &mut PendingWrites,
        max_outstanding: usize,
    ) {
        pending.retire_until(max_outstanding);
    }
}

use ndarray::{ArrayView, ArrayView2, ArrayViewMut, ArrayViewMut2, Dimension};

use super::{Barrier, PendingWrites};
use crate::KernelElement;

/// Hardware primitives the attention kernels are written against.
///
/// A backend is shared by every thread group of every kernel instance, so
/// all operations take `&self`; per-group state (barrier phases, outstanding
/// writes) is owned by the caller.
pub trait Backend: Sync + Sized {
    type Barrier: Barrier;

    fn name(&self) -> &str;

    /// On-chip memory available to a single kernel instance, in bytes.
    fn shared_memory_capacity(&self) -> usize;

    fn create_barrier(
        &self,
        num_arrivals: usize,
        label: &str,
    ) -> Self::Barrier;

    /// `acc += lhs · rhs` with reduced-precision operands and an f32
    /// accumulator. `rhs` may be a transposed view.
    fn matmul_accumulate<T: KernelElement>(
        &self,
        acc: ArrayViewMut2<'_, f32>,
        lhs: ArrayView2<'_, T>,
        rhs: ArrayView2<'_, T>,
    );

    /// Global to shared transfer. Completion is signalled by one arrival on
    /// `barrier`; the destination must not be read before that phase is
    /// awaited.
    fn copy_to_shared<T: KernelElement>(
        &self,
        src: ArrayView2<'_, T>,
        dst: ArrayViewMut2<'_, T>,
        barrier: &Self::Barrier,
    );

    /// Shared to global transfer, tracked in `pending` until
    /// [`Backend::wait_for_writes`] drains it.
    fn copy_to_global<T: Copy, D: Dimension>(
        &self,
        src: ArrayView<'_, T, D>,
        dst: ArrayViewMut<'_, T, D>,
        pending: &mut PendingWrites,
    );

    /// Blocks until at most `max_outstanding` writes tracked by `pending`
    /// remain in flight.
    fn wait_for_writes(
        &self,
        pending: &mut PendingWrites,
        max_outstanding: usize,
    );
}

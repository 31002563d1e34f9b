use super::{GroupBuffers, GroupIo, SoftmaxState};
use crate::{
    KernelElement,
    backends::common::{Backend, PendingWrites},
};

/// Normalizes the accumulator into the staging buffer, computes the optional
/// log-sum-exp, issues both write-backs and drains them.
pub fn write_back<B: Backend, T: KernelElement>(
    backend: &B,
    state: &SoftmaxState,
    buffers: &mut GroupBuffers<T>,
    io: &mut GroupIo<'_, T>,
) {
    state.normalize_into(buffers.staging.view_mut());

    let mut pending = PendingWrites::new();
    backend.copy_to_global(buffers.staging.view(), io.out.view_mut(), &mut pending);
    if let (Some(staging), Some(lse)) = (buffers.lse.as_mut(), io.lse.as_mut()) {
        state.log_sum_exp_into(staging.view_mut());
        backend.copy_to_global(staging.view(), lse.view_mut(), &mut pending);
    }
    backend.wait_for_writes(&mut pending, 0);
}

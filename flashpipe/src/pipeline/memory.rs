use log::trace;
use ndarray::ArrayView2;

use super::{PhaseTracker, SlotRing};
use crate::{KernelElement, backends::common::Backend};

/// Produces the tile of one input for a pipeline step.
pub type TileSource<'s, 'a, T> = &'s dyn Fn(usize) -> ArrayView2<'a, T>;

/// Memory thread group: streams `num_steps` tiles of every input into its
/// ring, in step order.
///
/// The first `depth` steps fill empty slots without waiting; every later
/// transfer into a slot waits until all consumers released the tile it held.
pub fn stream_tiles<B: Backend, T: KernelElement>(
    backend: &B,
    num_steps: usize,
    inputs: &[(&SlotRing<B, T>, TileSource<'_, '_, T>)],
) {
    let mut consumed: Vec<PhaseTracker> = inputs.iter().map(|(ring, _)| PhaseTracker::new(ring.depth())).collect();

    for step in 0..num_steps {
        for ((ring, source), phases) in inputs.iter().zip(consumed.iter_mut()) {
            let slot = ring.slot(step);
            if step >= ring.depth() {
                ring.wait_consumed(slot, phases);
            }
            trace!("{}: step {} into slot {}", ring.name(), step, slot);
            ring.fill(backend, slot, source(step));
        }
    }
}

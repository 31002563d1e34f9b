use ndarray::{Array2, ArrayView2};
use parking_lot::RwLock;

use super::PhaseTracker;
use crate::{
    KernelElement,
    backends::common::{Backend, Barrier},
};

/// Circular buffer of `depth` shared-memory tiles.
///
/// Each slot has a ready barrier (one arrival, from the transfer that fills
/// it) and a consumed barrier (one arrival per consumer). The writer may only
/// refill a slot once every consumer released it. Slot locks are held for a
/// single copy or read and never across a barrier wait.
pub struct SlotRing<B: Backend, T> {
    name: String,
    tiles: Box<[RwLock<Array2<T>>]>,
    ready: Box<[B::Barrier]>,
    consumed: Box<[B::Barrier]>,
}

impl<B: Backend, T: KernelElement> SlotRing<B, T> {
    pub fn new(
        backend: &B,
        name: &str,
        depth: usize,
        block_shape: [usize; 2],
        num_consumers: usize,
    ) -> Self {
        assert!(depth > 0, "Ring {name} needs at least one slot");
        let tiles = (0..depth)
            .map(|_| RwLock::new(Array2::default((block_shape[0], block_shape[1]))))
            .collect();
        let ready = (0..depth)
            .map(|slot| backend.create_barrier(1, &format!("{name}.ready[{slot}]")))
            .collect();
        let consumed = (0..depth)
            .map(|slot| backend.create_barrier(num_consumers, &format!("{name}.consumed[{slot}]")))
            .collect();

        Self {
            name: name.to_string(),
            tiles,
            ready,
            consumed,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn depth(&self) -> usize {
        self.tiles.len()
    }

    pub fn slot(
        &self,
        step: usize,
    ) -> usize {
        step % self.depth()
    }

    /// Issues the transfer of `src` into `slot`; completion arrives on the
    /// slot's ready barrier.
    pub fn fill(
        &self,
        backend: &B,
        slot: usize,
        src: ArrayView2<'_, T>,
    ) {
        let mut tile = self.tiles[slot].write();
        backend.copy_to_shared(src, tile.view_mut(), &self.ready[slot]);
    }

    pub fn read<R>(
        &self,
        slot: usize,
        f: impl FnOnce(ArrayView2<'_, T>) -> R,
    ) -> R {
        let tile = self.tiles[slot].read();
        f(tile.view())
    }

    pub fn release(
        &self,
        slot: usize,
    ) {
        self.consumed[slot].arrive();
    }

    pub fn wait_ready(
        &self,
        slot: usize,
        phases: &mut PhaseTracker,
    ) {
        phases.wait(&self.ready, slot);
    }

    pub fn wait_consumed(
        &self,
        slot: usize,
        phases: &mut PhaseTracker,
    ) {
        phases.wait(&self.consumed, slot);
    }
}

use crate::backends::common::Barrier;

/// Next phase a single thread group waits for on each barrier of an array.
///
/// Phases are not shared between groups: every waiter counts its own waits,
/// and the k-th wait of a group on a barrier is always for phase k.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    next_phase: Box<[u64]>,
}

impl PhaseTracker {
    pub fn new(num_barriers: usize) -> Self {
        Self {
            next_phase: vec![0; num_barriers].into_boxed_slice(),
        }
    }

    pub fn wait<B: Barrier>(
        &mut self,
        barriers: &[B],
        index: usize,
    ) {
        let phase = self.next_phase[index];
        barriers[index].wait_phase(phase);
        self.next_phase[index] = phase + 1;
    }

    pub fn next_phase(
        &self,
        index: usize,
    ) -> u64 {
        self.next_phase[index]
    }
}

use parking_lot::{Condvar, Mutex};

use crate::backends::common::Barrier;

#[derive(Debug, Default)]
struct BarrierState {
    pending_arrivals: usize,
    completed_phases: u64,
}

#[derive(Debug)]
pub struct CpuBarrier {
    num_arrivals: usize,
    label: String,
    state: Mutex<BarrierState>,
    phase_completed: Condvar,
}

impl CpuBarrier {
    pub fn new(
        num_arrivals: usize,
        label: &str,
    ) -> Self {
        assert!(num_arrivals > 0, "Barrier {label} needs at least one arrival per phase");
        Self {
            num_arrivals,
            label: label.to_string(),
            state: Mutex::new(BarrierState::default()),
            phase_completed: Condvar::new(),
        }
    }

    pub fn completed_phases(&self) -> u64 {
        self.state.lock().completed_phases
    }
}

impl Barrier for CpuBarrier {
    fn num_arrivals(&self) -> usize {
        self.num_arrivals
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn arrive(&self) {
        let mut state = self.state.lock();
        state.pending_arrivals += 1;
        if state.pending_arrivals == self.num_arrivals {
            state.pending_arrivals = 0;
            state.completed_phases += 1;
            self.phase_completed.notify_all();
        }
    }

    fn wait_phase(
        &self,
        phase: u64,
    ) {
        let mut state = self.state.lock();
        while state.completed_phases <= phase {
            self.phase_completed.wait(&mut state);
        }
    }
}

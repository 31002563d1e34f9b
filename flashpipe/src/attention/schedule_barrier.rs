use crate::backends::common::Barrier;

/// One compute group's handle on the barrier that arbitrates the matmul unit
/// between compute groups.
///
/// Every arrival of a group is paired with the arrival of the same ordinal
/// from the other group, so a group's wait targets the phase of its own most
/// recent arrival. When disabled every operation is a no-op.
pub struct ScheduleBarrier<'a, B: Barrier> {
    barrier: &'a B,
    enabled: bool,
    arrivals: u64,
}

impl<'a, B: Barrier> ScheduleBarrier<'a, B> {
    pub fn new(
        barrier: &'a B,
        enabled: bool,
    ) -> Self {
        Self {
            barrier,
            enabled,
            arrivals: 0,
        }
    }

    pub fn arrive(&mut self) {
        if self.enabled {
            self.barrier.arrive();
            self.arrivals += 1;
        }
    }

    pub fn wait(&mut self) {
        if self.enabled {
            debug_assert!(self.arrivals > 0, "{} waited before arriving", self.barrier.label());
            self.barrier.wait_phase(self.arrivals - 1);
        }
    }

    pub fn rendezvous(&mut self) {
        self.arrive();
        self.wait();
    }

    pub fn arrivals(&self) -> u64 {
        self.arrivals
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::backends::cpu::CpuBarrier;

    #[test]
    fn groups_one_phase_apart_stay_paired() {
        let barrier = CpuBarrier::new(2, "schedule");
        let rounds = 32;

        thread::scope(|scope| {
            for group in 0..2 {
                let barrier = &barrier;
                scope.spawn(move || {
                    let mut schedule = ScheduleBarrier::new(barrier, true);
                    if group == 1 {
                        schedule.rendezvous();
                    }
                    for _ in 0..rounds {
                        schedule.rendezvous();
                        schedule.arrive();
                        schedule.wait();
                    }
                    if group == 0 {
                        schedule.rendezvous();
                    }
                    assert_eq!(schedule.arrivals(), 2 * rounds + 1);
                });
            }
        });

        assert_eq!(barrier.completed_phases(), 2 * rounds + 1);
    }

    #[test]
    fn disabled_barrier_never_arrives() {
        let barrier = CpuBarrier::new(2, "schedule");
        let mut schedule = ScheduleBarrier::new(&barrier, false);
        schedule.rendezvous();
        assert_eq!(schedule.arrivals(), 0);
        assert_eq!(barrier.completed_phases(), 0);
    }
}

//! Hand-scheduled kernel: two compute thread groups and one memory thread
//! group per instance, synchronized through explicit barriers.

use std::{fmt, thread};

use log::trace;
use ndarray::s;

use super::{
    AttentionProblem, GroupBuffers, GroupIo, Instance, ScheduleBarrier, SoftmaxState, epilogue,
    problem::COMPUTE_GROUPS,
};
use crate::{
    KernelElement,
    backends::common::Backend,
    config::{SoftmaxOrdering, TuningConfig},
    pipeline::{PhaseTracker, SlotRing, TileSource, stream_tiles},
};

/// Role of a thread group within an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadGroup {
    Compute(usize),
    Memory,
}

impl fmt::Display for ThreadGroup {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ThreadGroup::Compute(index) => write!(f, "compute[{index}]"),
            ThreadGroup::Memory => f.write_str("memory"),
        }
    }
}

/// Shared-memory buffers and barriers of one instance.
struct InstanceContext<'a, B: Backend, T> {
    backend: &'a B,
    problem: &'a AttentionProblem,
    use_schedule_barrier: bool,
    softmax_ordering: SoftmaxOrdering,
    keys: SlotRing<B, T>,
    values: SlotRing<B, T>,
    query_ready: [B::Barrier; COMPUTE_GROUPS],
    schedule: B::Barrier,
}

pub fn run_instance<B: Backend, T: KernelElement>(
    backend: &B,
    problem: &AttentionProblem,
    config: &TuningConfig,
    instance: Instance<'_, T>,
) {
    let block_shape = [problem.block_kv, problem.head_dim];
    let context = InstanceContext {
        backend,
        problem,
        use_schedule_barrier: config.use_schedule_barrier(),
        softmax_ordering: config.softmax_ordering(problem.head_dim),
        keys: SlotRing::new(backend, "keys", problem.depth, block_shape, COMPUTE_GROUPS),
        values: SlotRing::new(backend, "values", problem.depth, block_shape, COMPUTE_GROUPS),
        query_ready: std::array::from_fn(|group| backend.create_barrier(1, &format!("query.ready[{group}]"))),
        schedule: backend.create_barrier(COMPUTE_GROUPS, "schedule"),
    };
    let Instance {
        keys,
        values,
        groups,
    } = instance;

    thread::scope(|scope| {
        let context = &context;
        for io in groups {
            scope.spawn(move || compute_group(context, io));
        }

        let rows = |step: usize| s![step * problem.block_kv..(step + 1) * problem.block_kv, ..];
        let key_tile = |step: usize| keys.slice(rows(step));
        let value_tile = |step: usize| values.slice(rows(step));
        let inputs: [(&SlotRing<B, T>, TileSource<'_, '_, T>); 2] =
            [(&context.keys, &key_tile), (&context.values, &value_tile)];
        stream_tiles(backend, problem.num_kv_steps(), &inputs);
        trace!("{} finished {} steps", ThreadGroup::Memory, problem.num_kv_steps());
    });
}

fn compute_group<B: Backend, T: KernelElement>(
    context: &InstanceContext<'_, B, T>,
    mut io: GroupIo<'_, T>,
) {
    let InstanceContext {
        backend,
        problem,
        keys,
        values,
        ..
    } = context;
    let role = ThreadGroup::Compute(io.index);
    let num_steps = problem.num_kv_steps();
    let mut buffers = GroupBuffers::<T>::new(problem, io.lse.is_some());
    let mut schedule = ScheduleBarrier::new(&context.schedule, context.use_schedule_barrier);
    let mut key_phases = PhaseTracker::new(keys.depth());
    let mut value_phases = PhaseTracker::new(values.depth());

    buffers.load_query(*backend, io.query.view(), &context.query_ready[io.index]);
    let mut state = SoftmaxState::new(problem.block_q, problem.head_dim);

    keys.wait_ready(0, &mut key_phases);
    if io.index == 1 {
        schedule.rendezvous();
    }

    for step in 0..num_steps {
        let slot = keys.slot(step);

        keys.read(slot, |tile| buffers.score(*backend, tile));
        schedule.rendezvous();
        keys.release(slot);

        state.rescale_and_exponentiate(&mut buffers.scores, buffers.probs.view_mut());
        match context.softmax_ordering {
            SoftmaxOrdering::SumBeforeBarrier => {
                state.accumulate_row_sums(buffers.scores.view());
                end_softmax(&mut schedule, values, slot, &mut value_phases);
            },
            SoftmaxOrdering::BarrierBeforeSum => {
                end_softmax(&mut schedule, values, slot, &mut value_phases);
                state.accumulate_row_sums(buffers.scores.view());
            },
        }

        values.read(slot, |tile| state.accumulate_values(*backend, buffers.probs.view(), tile));
        if step + 1 < num_steps {
            keys.wait_ready(keys.slot(step + 1), &mut key_phases);
        }
        values.release(slot);
    }

    if io.index == 0 {
        schedule.rendezvous();
    }
    epilogue::write_back(*backend, &state, &mut buffers, &mut io);
    trace!("{role} finished {num_steps} steps");
}

/// Hands the matmul unit to the other compute group and waits for both the
/// value tile and the unit to come back.
fn end_softmax<B: Backend, T: KernelElement>(
    schedule: &mut ScheduleBarrier<'_, B::Barrier>,
    values: &SlotRing<B, T>,
    slot: usize,
    value_phases: &mut PhaseTracker,
) {
    schedule.arrive();
    values.wait_ready(slot, value_phases);
    schedule.wait();
}

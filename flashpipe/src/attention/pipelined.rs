//! Attention expressed as a body of the generic warp-specialized pipeline.

use std::marker::PhantomData;

use super::{
    AttentionProblem, GroupBuffers, GroupIo, Instance, ScheduleBarrier, SoftmaxState, epilogue,
    problem::COMPUTE_GROUPS,
};
use crate::{
    KernelElement,
    backends::common::Backend,
    config::{SoftmaxOrdering, TuningConfig},
    pipeline::{BlockSpec, PipelineBody, StepContext, WarpSpecializedPipeline},
};

const KEYS: usize = 0;
const VALUES: usize = 1;

struct AttentionBody<'a, 'b, B: Backend, T> {
    backend: &'b B,
    problem: &'b AttentionProblem,
    softmax_ordering: SoftmaxOrdering,
    query_ready: &'b [B::Barrier],
    _io: PhantomData<fn(GroupIo<'a, T>)>,
}

struct ComputeGroup<'a, 'b, B: Backend, T> {
    io: GroupIo<'a, T>,
    buffers: GroupBuffers<T>,
    schedule: ScheduleBarrier<'b, B::Barrier>,
}

impl<'a, 'b, B: Backend, T: KernelElement> PipelineBody<B, T> for AttentionBody<'a, 'b, B, T> {
    type Carry = SoftmaxState;
    type Group = ComputeGroup<'a, 'b, B, T>;

    fn prologue(
        &self,
        group: &mut Self::Group,
    ) -> SoftmaxState {
        let state = SoftmaxState::new(self.problem.block_q, self.problem.head_dim);
        let index = group.io.index;
        group.buffers.load_query(self.backend, group.io.query.view(), &self.query_ready[index]);
        if index == 1 {
            group.schedule.rendezvous();
        }
        state
    }

    fn step(
        &self,
        group: &mut Self::Group,
        context: &mut StepContext<'_, B, T>,
        mut state: SoftmaxState,
    ) -> SoftmaxState {
        let buffers = &mut group.buffers;

        context.with_input(KEYS, |tile| buffers.score(self.backend, tile));
        group.schedule.rendezvous();
        context.release(KEYS);

        state.rescale_and_exponentiate(&mut buffers.scores, buffers.probs.view_mut());
        match self.softmax_ordering {
            SoftmaxOrdering::SumBeforeBarrier => {
                state.accumulate_row_sums(buffers.scores.view());
                group.schedule.rendezvous();
            },
            SoftmaxOrdering::BarrierBeforeSum => {
                group.schedule.rendezvous();
                state.accumulate_row_sums(buffers.scores.view());
            },
        }

        context.with_input(VALUES, |tile| state.accumulate_values(self.backend, buffers.probs.view(), tile));
        context.release(VALUES);
        state
    }

    fn epilogue(
        &self,
        group: &mut Self::Group,
        state: SoftmaxState,
    ) {
        if group.io.index == 0 {
            group.schedule.rendezvous();
        }
        epilogue::write_back(self.backend, &state, &mut group.buffers, &mut group.io);
    }
}

pub fn run_instance<B: Backend, T: KernelElement>(
    backend: &B,
    problem: &AttentionProblem,
    config: &TuningConfig,
    instance: Instance<'_, T>,
) {
    let query_ready: Vec<B::Barrier> =
        (0..COMPUTE_GROUPS).map(|group| backend.create_barrier(1, &format!("query.ready[{group}]"))).collect();
    let schedule = backend.create_barrier(COMPUTE_GROUPS, "schedule");

    let body = AttentionBody {
        backend,
        problem,
        softmax_ordering: config.softmax_ordering(problem.head_dim),
        query_ready: &query_ready,
        _io: PhantomData,
    };
    let Instance {
        keys,
        values,
        groups,
    } = instance;
    let groups = groups
        .into_iter()
        .map(|io| ComputeGroup {
            buffers: GroupBuffers::new(problem, io.lse.is_some()),
            schedule: ScheduleBarrier::new(&schedule, config.use_schedule_barrier()),
            io,
        })
        .collect();

    let block_shape = [problem.block_kv, problem.head_dim];
    let pipeline = WarpSpecializedPipeline::new(
        backend,
        problem.num_kv_steps(),
        problem.depth,
        COMPUTE_GROUPS,
        vec![
            BlockSpec::new("keys", block_shape, |step| [step, 0]),
            BlockSpec::new("values", block_shape, |step| [step, 0]),
        ],
    )
    .with_manual_consumed_barriers(true);
    pipeline.run(&body, &[keys, values], groups);
}

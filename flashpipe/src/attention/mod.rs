mod compute;
mod epilogue;
mod error;
mod grid;
mod pipelined;
mod problem;
mod schedule_barrier;
mod shared_memory;
mod softmax;
mod warp_specialized;

pub use compute::GroupBuffers;
pub use error::AttentionError;
pub use grid::{GroupIo, Instance};
use half::{bf16, f16};
use log::debug;
pub use problem::{AttentionProblem, COMPUTE_GROUPS, TensorDims};
pub use schedule_barrier::ScheduleBarrier;
pub use shared_memory::SharedMemoryPlan;
pub use softmax::SoftmaxState;
pub use warp_specialized::ThreadGroup;

use crate::{
    Array, DataType, KernelElement,
    backends::{common::Backend, cpu::Cpu},
    config::TuningConfig,
};

#[derive(Debug, Clone)]
pub struct AttentionOutput {
    /// Same shape and data type as the query.
    pub out: Array,
    /// f32 `[batch, q_heads, q_len]` base-2 log-sum-exp, when requested.
    pub lse: Option<Array>,
}

/// Which statement of the kernel to run. Both compute the same values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Formulation {
    WarpSpecialized,
    PipelineEmitter,
}

pub fn attention(
    q: &Array,
    k: &Array,
    v: &Array,
    config: &TuningConfig,
    save_residuals: bool,
) -> Result<AttentionOutput, AttentionError> {
    attention_with_backend(&Cpu::new(), q, k, v, config, save_residuals)
}

pub fn attention_with_backend<B: Backend>(
    backend: &B,
    q: &Array,
    k: &Array,
    v: &Array,
    config: &TuningConfig,
    save_residuals: bool,
) -> Result<AttentionOutput, AttentionError> {
    run(backend, q, k, v, config, save_residuals, Formulation::WarpSpecialized)
}

pub fn attention_with_pipeline_emitter(
    q: &Array,
    k: &Array,
    v: &Array,
    config: &TuningConfig,
    save_residuals: bool,
) -> Result<AttentionOutput, AttentionError> {
    attention_with_pipeline_emitter_and_backend(&Cpu::new(), q, k, v, config, save_residuals)
}

pub fn attention_with_pipeline_emitter_and_backend<B: Backend>(
    backend: &B,
    q: &Array,
    k: &Array,
    v: &Array,
    config: &TuningConfig,
    save_residuals: bool,
) -> Result<AttentionOutput, AttentionError> {
    run(backend, q, k, v, config, save_residuals, Formulation::PipelineEmitter)
}

/// Validates the problem, checks the on-chip footprint and launches the grid.
pub fn run<B: Backend>(
    backend: &B,
    q: &Array,
    k: &Array,
    v: &Array,
    config: &TuningConfig,
    save_residuals: bool,
    formulation: Formulation,
) -> Result<AttentionOutput, AttentionError> {
    let problem = AttentionProblem::new(q, k, v, config)?;
    let plan = SharedMemoryPlan::new(&problem, save_residuals);
    plan.check(backend.shared_memory_capacity())?;

    debug!(
        "Launching {:?} attention on {}: grid {}x{}x{}, {} kv steps, depth {}, {} bytes of shared memory",
        formulation,
        backend.name(),
        problem.batch_size,
        problem.num_q_tiles(),
        problem.num_q_heads,
        problem.num_kv_steps(),
        problem.depth,
        plan.total()
    );

    match problem.data_type {
        DataType::F16 => Ok(launch::<B, f16>(backend, &problem, config, q, k, v, save_residuals, formulation)),
        DataType::BF16 => Ok(launch::<B, bf16>(backend, &problem, config, q, k, v, save_residuals, formulation)),
        data_type => Err(AttentionError::UnsupportedDataType(data_type)),
    }
}

#[allow(clippy::too_many_arguments)]
fn launch<B: Backend, T: KernelElement>(
    backend: &B,
    problem: &AttentionProblem,
    config: &TuningConfig,
    q: &Array,
    k: &Array,
    v: &Array,
    save_residuals: bool,
    formulation: Formulation,
) -> AttentionOutput {
    grid::launch::<T, _>(problem, q, k, v, save_residuals, |instance| match formulation {
        Formulation::WarpSpecialized => warp_specialized::run_instance(backend, problem, config, instance),
        Formulation::PipelineEmitter => pipelined::run_instance(backend, problem, config, instance),
    })
}

//! Generic warp-specialized producer/consumer pipeline.
//!
//! A memory thread group streams tiles of every input into per-input slot
//! rings while `num_compute_groups` compute thread groups run a
//! [`PipelineBody`] over the same steps, threading a carry from one step to
//! the next.

mod memory;
mod phase_tracker;
mod slot_ring;

use std::thread;

use log::trace;
use ndarray::{ArrayView2, s};
pub use memory::{TileSource, stream_tiles};
pub use phase_tracker::PhaseTracker;
pub use slot_ring::SlotRing;

use crate::{KernelElement, backends::common::Backend};

const MAX_INPUTS: usize = u64::BITS as usize;

/// Blocked view of one pipeline input.
#[derive(Debug, Clone)]
pub struct BlockSpec {
    pub name: String,
    pub block_shape: [usize; 2],
    /// Maps a pipeline step to block coordinates; block `[i, j]` covers rows
    /// `i * block_shape[0]..` and columns `j * block_shape[1]..`.
    pub index_map: fn(usize) -> [usize; 2],
}

impl BlockSpec {
    pub fn new(
        name: &str,
        block_shape: [usize; 2],
        index_map: fn(usize) -> [usize; 2],
    ) -> Self {
        Self {
            name: name.to_string(),
            block_shape,
            index_map,
        }
    }

    pub fn block<'a, T>(
        &self,
        source: &ArrayView2<'a, T>,
        step: usize,
    ) -> ArrayView2<'a, T> {
        let [row, column] = (self.index_map)(step);
        let [rows, columns] = self.block_shape;
        source.clone().slice_move(s![row * rows..(row + 1) * rows, column * columns..(column + 1) * columns])
    }
}

/// Per-compute-group body of a pipeline.
///
/// `prologue` runs once before the first step and yields the initial carry,
/// `step` runs once per step after every input's tile is staged, and
/// `epilogue` receives the final carry.
pub trait PipelineBody<B: Backend, T: KernelElement>: Sync {
    type Carry;
    type Group: Send;

    fn prologue(
        &self,
        group: &mut Self::Group,
    ) -> Self::Carry;

    fn step(
        &self,
        group: &mut Self::Group,
        context: &mut StepContext<'_, B, T>,
        carry: Self::Carry,
    ) -> Self::Carry;

    fn epilogue(
        &self,
        group: &mut Self::Group,
        carry: Self::Carry,
    );
}

/// Access to the staged tiles of the current step.
pub struct StepContext<'r, B: Backend, T> {
    step: usize,
    rings: &'r [SlotRing<B, T>],
    released: u64,
}

impl<'r, B: Backend, T: KernelElement> StepContext<'r, B, T> {
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn with_input<R>(
        &self,
        input: usize,
        f: impl FnOnce(ArrayView2<'_, T>) -> R,
    ) -> R {
        let ring = &self.rings[input];
        assert!(!self.is_released(input), "{} read after release in step {}", ring.name(), self.step);
        ring.read(ring.slot(self.step), f)
    }

    /// Signals that this compute group is done with the input's tile.
    pub fn release(
        &mut self,
        input: usize,
    ) {
        let ring = &self.rings[input];
        assert!(!self.is_released(input), "{} released twice in step {}", ring.name(), self.step);
        self.released |= 1 << input;
        ring.release(ring.slot(self.step));
    }

    pub fn is_released(
        &self,
        input: usize,
    ) -> bool {
        self.released & (1 << input) != 0
    }
}

pub struct WarpSpecializedPipeline<'b, B: Backend> {
    backend: &'b B,
    grid: usize,
    max_concurrent_steps: usize,
    num_compute_groups: usize,
    in_specs: Vec<BlockSpec>,
    manual_consumed_barriers: bool,
}

impl<'b, B: Backend> WarpSpecializedPipeline<'b, B> {
    pub fn new(
        backend: &'b B,
        grid: usize,
        max_concurrent_steps: usize,
        num_compute_groups: usize,
        in_specs: Vec<BlockSpec>,
    ) -> Self {
        assert!(max_concurrent_steps > 0, "Pipeline needs at least one slot per input");
        assert!(num_compute_groups > 0, "Pipeline needs at least one compute group");
        assert!(in_specs.len() <= MAX_INPUTS, "Pipeline supports at most {MAX_INPUTS} inputs");
        Self {
            backend,
            grid,
            max_concurrent_steps,
            num_compute_groups,
            in_specs,
            manual_consumed_barriers: false,
        }
    }

    /// When set, the body must release every input in every step itself.
    pub fn with_manual_consumed_barriers(
        self,
        manual_consumed_barriers: bool,
    ) -> Self {
        Self {
            manual_consumed_barriers,
            ..self
        }
    }

    pub fn depth(&self) -> usize {
        self.max_concurrent_steps.min(self.grid).max(1)
    }

    /// Runs the pipeline over `inputs` (one full view per block spec), with
    /// one compute thread group per entry of `groups` and the memory thread
    /// group on the calling thread.
    pub fn run<T, Body>(
        &self,
        body: &Body,
        inputs: &[ArrayView2<'_, T>],
        groups: Vec<Body::Group>,
    ) where
        T: KernelElement,
        Body: PipelineBody<B, T>,
    {
        assert_eq!(inputs.len(), self.in_specs.len(), "Expected one input per block spec");
        assert_eq!(groups.len(), self.num_compute_groups, "Expected one state per compute group");

        let depth = self.depth();
        let rings: Vec<SlotRing<B, T>> = self
            .in_specs
            .iter()
            .map(|spec| SlotRing::new(self.backend, &spec.name, depth, spec.block_shape, self.num_compute_groups))
            .collect();
        let sources: Vec<_> = self
            .in_specs
            .iter()
            .zip(inputs)
            .map(|(spec, input)| move |step: usize| spec.block(input, step))
            .collect();

        thread::scope(|scope| {
            for (index, group) in groups.into_iter().enumerate() {
                let rings = &rings;
                scope.spawn(move || self.run_compute_group(index, body, rings, group));
            }

            let streams: Vec<(&SlotRing<B, T>, TileSource<'_, '_, T>)> = rings
                .iter()
                .zip(&sources)
                .map(|(ring, source)| (ring, source as TileSource<'_, '_, T>))
                .collect();
            stream_tiles(self.backend, self.grid, &streams);
        });
    }

    fn run_compute_group<T, Body>(
        &self,
        index: usize,
        body: &Body,
        rings: &[SlotRing<B, T>],
        mut group: Body::Group,
    ) where
        T: KernelElement,
        Body: PipelineBody<B, T>,
    {
        let mut ready: Vec<PhaseTracker> = rings.iter().map(|ring| PhaseTracker::new(ring.depth())).collect();

        let mut carry = body.prologue(&mut group);
        for step in 0..self.grid {
            for (ring, phases) in rings.iter().zip(ready.iter_mut()) {
                ring.wait_ready(ring.slot(step), phases);
            }

            let mut context = StepContext {
                step,
                rings,
                released: 0,
            };
            carry = body.step(&mut group, &mut context, carry);

            for (input, ring) in rings.iter().enumerate() {
                if context.is_released(input) {
                    continue;
                }
                assert!(
                    !self.manual_consumed_barriers,
                    "Compute group {index} did not release {} in step {step}",
                    ring.name()
                );
                context.release(input);
            }
        }
        body.epilogue(&mut group, carry);
        trace!("Compute group {index} finished {} steps", self.grid);
    }
}

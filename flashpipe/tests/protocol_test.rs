mod common;

use std::{collections::HashSet, sync::Arc};

use common::{assert_allclose, random_qkv};
use flashpipe::{
    ATOL, Array, AttentionOutput, KernelElement, RTOL, TuningConfig, attention_reference, attention_with_backend,
    attention_with_pipeline_emitter_and_backend,
    backends::{
        common::{Backend, Barrier, PendingWrites},
        cpu::{Cpu, CpuBarrier},
    },
};
use half::f16;
use ndarray::{ArrayView, ArrayView2, ArrayViewMut, ArrayViewMut2, Dimension};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Fill {
        barrier: String,
        source: usize,
    },
    Arrive {
        barrier: String,
    },
}

type EventLog = Arc<Mutex<Vec<Event>>>;

struct RecordingBarrier {
    inner: CpuBarrier,
    events: EventLog,
}

impl Barrier for RecordingBarrier {
    fn num_arrivals(&self) -> usize {
        self.inner.num_arrivals()
    }

    fn label(&self) -> &str {
        self.inner.label()
    }

    fn arrive(&self) {
        self.events.lock().push(Event::Arrive {
            barrier: self.label().to_string(),
        });
        self.inner.arrive();
    }

    fn wait_phase(
        &self,
        phase: u64,
    ) {
        self.inner.wait_phase(phase);
    }
}

/// Cpu backend that logs every shared-memory fill and barrier arrival in
/// global order.
#[derive(Default)]
struct RecordingBackend {
    inner: Cpu,
    events: EventLog,
}

impl Backend for RecordingBackend {
    type Barrier = RecordingBarrier;

    fn name(&self) -> &str {
        "recording"
    }

    fn shared_memory_capacity(&self) -> usize {
        self.inner.shared_memory_capacity()
    }

    fn create_barrier(
        &self,
        num_arrivals: usize,
        label: &str,
    ) -> RecordingBarrier {
        RecordingBarrier {
            inner: self.inner.create_barrier(num_arrivals, label),
            events: self.events.clone(),
        }
    }

    fn matmul_accumulate<T: KernelElement>(
        &self,
        acc: ArrayViewMut2<'_, f32>,
        lhs: ArrayView2<'_, T>,
        rhs: ArrayView2<'_, T>,
    ) {
        self.inner.matmul_accumulate(acc, lhs, rhs);
    }

    fn copy_to_shared<T: KernelElement>(
        &self,
        src: ArrayView2<'_, T>,
        dst: ArrayViewMut2<'_, T>,
        barrier: &RecordingBarrier,
    ) {
        self.events.lock().push(Event::Fill {
            barrier: barrier.label().to_string(),
            source: src.as_ptr() as usize,
        });
        self.inner.copy_to_shared(src, dst, &barrier.inner);
    }

    fn copy_to_global<T: Copy, D: Dimension>(
        &self,
        src: ArrayView<'_, T, D>,
        dst: ArrayViewMut<'_, T, D>,
        pending: &mut PendingWrites,
    ) {
        self.inner.copy_to_global(src, dst, pending);
    }

    fn wait_for_writes(
        &self,
        pending: &mut PendingWrites,
        max_outstanding: usize,
    ) {
        self.inner.wait_for_writes(pending, max_outstanding);
    }
}

const NUM_KV_STEPS: usize = 8;
const BLOCK_KV: usize = 64;

/// Checks the refill rule of one ring: the j-th fill of a slot (0-based)
/// happens only after `2 * j` consumer releases of that slot.
fn check_ring(
    events: &[Event],
    ring: &str,
    depth: usize,
) {
    let ready: Vec<String> = (0..depth).map(|slot| format!("{ring}.ready[{slot}]")).collect();
    let consumed: Vec<String> = (0..depth).map(|slot| format!("{ring}.consumed[{slot}]")).collect();
    let mut fills = vec![0usize; depth];
    let mut releases = vec![0usize; depth];
    let mut sources = HashSet::new();

    for event in events {
        match event {
            Event::Fill {
                barrier,
                source,
            } => {
                if let Some(slot) = ready.iter().position(|label| label == barrier) {
                    assert!(
                        releases[slot] >= 2 * fills[slot],
                        "{ring} slot {slot} refilled after {} releases (fill {})",
                        releases[slot],
                        fills[slot]
                    );
                    fills[slot] += 1;
                    sources.insert(*source);
                }
            },
            Event::Arrive {
                barrier,
            } => {
                if let Some(slot) = consumed.iter().position(|label| label == barrier) {
                    releases[slot] += 1;
                }
            },
        }
    }

    assert_eq!(fills.iter().sum::<usize>(), NUM_KV_STEPS, "{ring} fills");
    assert_eq!(sources.len(), NUM_KV_STEPS, "{ring} tiles copied more than once");
    assert_eq!(releases.iter().sum::<usize>(), 2 * NUM_KV_STEPS, "{ring} releases");
}

fn run_recorded(
    max_concurrent_steps: usize,
    run: impl Fn(&RecordingBackend, &TuningConfig, &Array, &Array, &Array) -> AttentionOutput,
) {
    let config = TuningConfig::new(64, BLOCK_KV, max_concurrent_steps).unwrap();
    let backend = RecordingBackend::default();
    // A single instance, so barrier labels are unambiguous.
    let (q, k, v) = random_qkv::<f16>(1, 128, NUM_KV_STEPS * BLOCK_KV, 1, 1, 64, 3);

    let output = run(&backend, &config, &q, &k, &v);
    let expected = attention_reference(&q, &k, &v, false).unwrap();
    assert_allclose(&output.out, &expected.out, ATOL, RTOL, "recorded run");

    let events = backend.events.lock().clone();
    let depth = config.pipeline_depth(NUM_KV_STEPS * BLOCK_KV);
    check_ring(&events, "keys", depth);
    check_ring(&events, "values", depth);

    let query_fills = events
        .iter()
        .filter(|event| matches!(event, Event::Fill { barrier, .. } if barrier.starts_with("query.ready")))
        .count();
    assert_eq!(query_fills, 2);
}

#[test]
fn test_warp_specialized_respects_consumed_barriers() {
    for max_concurrent_steps in [2, 3] {
        run_recorded(max_concurrent_steps, |backend, config, q, k, v| {
            attention_with_backend(backend, q, k, v, config, false).unwrap()
        });
    }
}

#[test]
fn test_pipeline_emitter_respects_consumed_barriers() {
    for max_concurrent_steps in [2, 4] {
        run_recorded(max_concurrent_steps, |backend, config, q, k, v| {
            attention_with_pipeline_emitter_and_backend(backend, q, k, v, config, false).unwrap()
        });
    }
}

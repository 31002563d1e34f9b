/// Phase-based arrival barrier.
///
/// A phase completes once `num_arrivals` arrivals have been observed since the
/// previous phase completed; arrivals past that point count towards the next
/// phase. Waiters name the phase they wait for, so a thread that falls behind
/// never blocks on a phase that already completed.
pub trait Barrier: Send + Sync {
    fn num_arrivals(&self) -> usize;

    fn label(&self) -> &str;

    fn arrive(&self);

    /// Blocks until phase `phase` (0-based) has completed.
    fn wait_phase(
        &self,
        phase: u64,
    );
}

use ndarray::{Array1, Array2, ArrayView2};

use super::AttentionProblem;
use crate::{
    KernelElement,
    backends::common::{Backend, Barrier},
};

/// Working set of one compute group, sized once at instance start.
pub struct GroupBuffers<T> {
    /// Query tile on entry, normalized output tile in the epilogue.
    pub staging: Array2<T>,
    pub scores: Array2<f32>,
    pub probs: Array2<T>,
    pub lse: Option<Array1<f32>>,
}

impl<T: KernelElement> GroupBuffers<T> {
    pub fn new(
        problem: &AttentionProblem,
        save_residuals: bool,
    ) -> Self {
        let block_q = problem.block_q;
        Self {
            staging: Array2::default((block_q, problem.head_dim)),
            scores: Array2::zeros((block_q, problem.block_kv)),
            probs: Array2::default((block_q, problem.block_kv)),
            lse: save_residuals.then(|| Array1::zeros(block_q)),
        }
    }

    /// Transfers the group's query rows into staging and waits for them.
    pub fn load_query<B: Backend>(
        &mut self,
        backend: &B,
        query: ArrayView2<'_, T>,
        ready: &B::Barrier,
    ) {
        backend.copy_to_shared(query, self.staging.view_mut(), ready);
        ready.wait_phase(0);
    }

    /// `scores = query · keysᵗ`.
    pub fn score<B: Backend>(
        &mut self,
        backend: &B,
        keys: ArrayView2<'_, T>,
    ) {
        self.scores.fill(0.0);
        backend.matmul_accumulate(self.scores.view_mut(), self.staging.view(), keys.reversed_axes());
    }
}

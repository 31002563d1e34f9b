use std::f32::consts::LOG2_E;

use ndarray::{Array1, Array2, ArrayView2, ArrayViewMut1, ArrayViewMut2, Zip};

use crate::{KernelElement, backends::common::Backend};

/// Running online-softmax state of one compute group over one query tile.
///
/// `m` is kept pre-multiplied by log2(e) so that exponentials reduce to a
/// single fused multiply-add followed by `exp2`.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftmaxState {
    m: Array1<f32>,
    l: Array1<f32>,
    acc: Array2<f32>,
}

impl SoftmaxState {
    pub fn new(
        block_q: usize,
        head_dim: usize,
    ) -> Self {
        Self {
            m: Array1::from_elem(block_q, f32::NEG_INFINITY),
            l: Array1::zeros(block_q),
            acc: Array2::zeros((block_q, head_dim)),
        }
    }

    pub fn running_max(&self) -> &Array1<f32> {
        &self.m
    }

    pub fn running_sum(&self) -> &Array1<f32> {
        &self.l
    }

    /// Folds a score tile into the running max, rescales the accumulator and
    /// running sum, and overwrites `scores` with the f32 probabilities. The
    /// probabilities are also narrowed into `probs` for the value matmul.
    pub fn rescale_and_exponentiate<T: KernelElement>(
        &mut self,
        scores: &mut Array2<f32>,
        mut probs: ArrayViewMut2<'_, T>,
    ) {
        Zip::from(scores.rows_mut())
            .and(probs.rows_mut())
            .and(&mut self.m)
            .and(&mut self.l)
            .and(self.acc.rows_mut())
            .for_each(|mut scores, mut probs, m, l, mut acc| {
                let row_max = scores.fold(f32::NEG_INFINITY, |max, &score| max.max(score));
                let m_new = (*m).max(row_max * LOG2_E);
                let alpha = (*m - m_new).exp2();
                *m = m_new;

                scores.mapv_inplace(|score| score.mul_add(LOG2_E, -m_new).exp2());
                acc.mapv_inplace(|value| value * alpha);
                *l *= alpha;
                Zip::from(&mut probs).and(&scores).for_each(|prob, &p| *prob = T::narrow(p));
            });
    }

    /// `l += rowsum(p)` over the f32 probabilities.
    pub fn accumulate_row_sums(
        &mut self,
        probs: ArrayView2<'_, f32>,
    ) {
        Zip::from(&mut self.l).and(probs.rows()).for_each(|l, row| *l += row.sum());
    }

    /// `acc += probs · values`.
    pub fn accumulate_values<B: Backend, T: KernelElement>(
        &mut self,
        backend: &B,
        probs: ArrayView2<'_, T>,
        values: ArrayView2<'_, T>,
    ) {
        backend.matmul_accumulate(self.acc.view_mut(), probs, values);
    }

    /// Writes `acc / l` in the working type.
    pub fn normalize_into<T: KernelElement>(
        &self,
        mut out: ArrayViewMut2<'_, T>,
    ) {
        Zip::from(out.rows_mut()).and(self.acc.rows()).and(&self.l).for_each(|mut out, acc, &l| {
            Zip::from(&mut out).and(&acc).for_each(|out, &value| *out = T::narrow(value / l));
        });
    }

    /// Base-2 log-sum-exp of every row, `m + log2(l)`.
    pub fn log_sum_exp_into(
        &self,
        lse: ArrayViewMut1<'_, f32>,
    ) {
        Zip::from(lse).and(&self.m).and(&self.l).for_each(|lse, &m, &l| *lse = m + l.ln() * LOG2_E);
    }
}

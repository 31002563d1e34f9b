use ndarray::{ArrayView2, ArrayViewMut2, linalg::general_mat_mul};

use crate::KernelElement;

/// `acc += lhs · rhs` with both operands widened to f32 scratch first, so
/// every product and sum is carried out in f32. `rhs` may be a transposed
/// view.
pub fn accumulate<T: KernelElement>(
    mut acc: ArrayViewMut2<'_, f32>,
    lhs: ArrayView2<'_, T>,
    rhs: ArrayView2<'_, T>,
) {
    let (m, k) = lhs.dim();
    let (rhs_k, n) = rhs.dim();
    assert_eq!(k, rhs_k, "Contraction dims differ: lhs {:?}, rhs {:?}", lhs.dim(), rhs.dim());
    assert_eq!(acc.dim(), (m, n), "Accumulator {:?} does not match {m}x{n}", acc.dim());

    let lhs = lhs.mapv(T::widen);
    let rhs = rhs.mapv(T::widen);
    general_mat_mul(1.0, &lhs, &rhs, 1.0, &mut acc);
}

#[cfg(test)]
mod tests {
    use half::{bf16, f16};
    use ndarray::{Array2, ShapeBuilder, s};

    use super::*;

    fn narrow<T: KernelElement>(values: &Array2<f32>) -> Array2<T> {
        values.mapv(T::narrow)
    }

    #[test]
    fn matches_f32_product() {
        let lhs = Array2::from_shape_fn((3, 4), |(i, j)| (i as f32) - 0.5 * (j as f32));
        let rhs = Array2::from_shape_fn((4, 2), |(i, j)| 0.25 * (i + j) as f32);
        let expected = lhs.dot(&rhs);

        let mut acc = Array2::<f32>::zeros((3, 2));
        accumulate(acc.view_mut(), narrow::<f16>(&lhs).view(), narrow::<f16>(&rhs).view());
        assert_eq!(acc, expected);
    }

    #[test]
    fn transposed_rhs_uses_same_values() {
        let lhs = Array2::from_shape_fn((2, 3), |(i, j)| (i * 3 + j) as f32);
        let keys = Array2::from_shape_fn((4, 3), |(i, j)| (i as f32) - (j as f32));
        let expected = lhs.dot(&keys.t());

        let keys = narrow::<bf16>(&keys);
        let mut acc = Array2::<f32>::zeros((2, 4));
        accumulate(acc.view_mut(), narrow::<bf16>(&lhs).view(), keys.t());
        assert_eq!(acc, expected);

        let mut column_major = Array2::<bf16>::default((3, 4).f());
        column_major.assign(&keys.t());
        let mut acc_column_major = Array2::<f32>::zeros((2, 4));
        accumulate(acc_column_major.view_mut(), narrow::<bf16>(&lhs).view(), column_major.view());
        assert_eq!(acc_column_major, expected);
    }

    #[test]
    fn strided_lhs() {
        let lhs = Array2::from_shape_fn((2, 6), |(i, j)| (i + j) as f32);
        let rhs = Array2::from_shape_fn((3, 2), |(i, j)| (i * 2 + j) as f32);
        let expected = lhs.slice(s![.., ..;2]).dot(&rhs);

        let lhs = narrow::<f16>(&lhs);
        let mut acc = Array2::<f32>::zeros((2, 2));
        accumulate(acc.view_mut(), lhs.slice(s![.., ..;2]), narrow::<f16>(&rhs).view());
        assert_eq!(acc, expected);
    }

    #[test]
    fn accumulates_into_existing_values() {
        let lhs = Array2::from_elem((2, 2), f16::from_f32(1.0));
        let rhs = Array2::from_elem((2, 2), f16::from_f32(1.0));
        let mut acc = Array2::from_elem((2, 2), 1.0f32);
        accumulate(acc.view_mut(), lhs.view(), rhs.view());
        assert!(acc.iter().all(|value| *value == 3.0));
    }
}

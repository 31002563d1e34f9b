use ndarray::{ArrayD, ArrayView, Dimension, IxDyn};
use num_traits::NumCast;

use crate::{ArrayElement, DataType};

/// Host tensor with a runtime element type.
///
/// Storage is backed by `u64` words so that typed views of any supported
/// element type are always aligned.
#[derive(Debug, Clone)]
pub struct Array {
    words: Box<[u64]>,
    shape: Box<[usize]>,
    data_type: DataType,
    label: String,
}

pub fn size_for_shape(
    shape: &[usize],
    data_type: DataType,
) -> usize {
    shape.iter().product::<usize>() * data_type.size_in_bytes()
}

impl Array {
    // Constructors
    pub fn zeros(
        shape: &[usize],
        data_type: DataType,
        label: &str,
    ) -> Self {
        let size = size_for_shape(shape, data_type);
        Self {
            words: vec![0u64; size.div_ceil(8)].into_boxed_slice(),
            shape: shape.into(),
            data_type,
            label: label.to_string(),
        }
    }

    pub fn from_slice<T: ArrayElement>(
        shape: &[usize],
        data: &[T],
        label: &str,
    ) -> Self {
        let expected: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected,
            "Shape {:?} requires {} elements, got {}",
            shape,
            expected,
            data.len()
        );
        let mut array = Self::zeros(shape, T::data_type(), label);
        array.as_slice_mut::<T>().copy_from_slice(data);
        array
    }

    pub fn from_view<T: ArrayElement, D: Dimension>(
        view: ArrayView<T, D>,
        label: &str,
    ) -> Self {
        let mut array = Self::zeros(view.shape(), T::data_type(), label);
        array.copy_from_view(view);
        array
    }

    // Getters
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    // Utility
    pub fn size(&self) -> usize {
        size_for_shape(&self.shape, self.data_type)
    }

    fn validate_element_type<T: ArrayElement>(&self) {
        assert_eq!(
            T::data_type(),
            self.data_type,
            "Invalid data type for {}, expected {:?}, actual {:?}",
            self.label,
            T::data_type(),
            self.data_type
        );
    }

    pub fn as_bytes(&self) -> &[u8] {
        let size = self.size();
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..size]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let size = self.size();
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..size]
    }

    pub fn as_slice<T: ArrayElement>(&self) -> &[T] {
        self.validate_element_type::<T>();
        bytemuck::cast_slice(self.as_bytes())
    }

    pub fn as_slice_mut<T: ArrayElement>(&mut self) -> &mut [T] {
        self.validate_element_type::<T>();
        bytemuck::cast_slice_mut(self.as_bytes_mut())
    }

    pub fn as_view<T: ArrayElement>(&self) -> ArrayView<'_, T, IxDyn> {
        ArrayView::from_shape(IxDyn(self.shape()), self.as_slice::<T>())
            .expect("Failed to create array view")
    }

    /// Converts every element to `T` through `NumCast`, e.g. to widen a
    /// half-precision tensor to f32 for comparisons.
    pub fn to_ndarray<T: ArrayElement>(&self) -> ArrayD<T> {
        fn cast_all<S: ArrayElement, T: ArrayElement>(array: &Array) -> ArrayD<T> {
            array.as_view::<S>().mapv(|value| {
                <T as NumCast>::from(value).expect("Value is not representable in the target type")
            })
        }

        match self.data_type {
            DataType::BF16 => cast_all::<half::bf16, T>(self),
            DataType::F16 => cast_all::<half::f16, T>(self),
            DataType::F32 => cast_all::<f32, T>(self),
            DataType::F64 => cast_all::<f64, T>(self),
            DataType::I8 => cast_all::<i8, T>(self),
            DataType::U8 => cast_all::<u8, T>(self),
            DataType::I16 => cast_all::<i16, T>(self),
            DataType::U16 => cast_all::<u16, T>(self),
            DataType::I32 => cast_all::<i32, T>(self),
            DataType::U32 => cast_all::<u32, T>(self),
            DataType::I64 => cast_all::<i64, T>(self),
            DataType::U64 => cast_all::<u64, T>(self),
        }
    }

    pub fn copy_from_view<T: ArrayElement, D: Dimension>(
        &mut self,
        view: ArrayView<T, D>,
    ) {
        assert_eq!(self.data_type(), T::data_type());

        let dst_slice = self.as_slice_mut::<T>();

        if view.is_standard_layout() {
            let src_slice = view.as_slice_memory_order().expect("Standard layout views are contiguous");
            assert!(src_slice.len() <= dst_slice.len());
            dst_slice[..src_slice.len()].copy_from_slice(src_slice);
        } else {
            assert!(view.len() <= dst_slice.len());
            for (d, s) in dst_slice.iter_mut().zip(view.iter()) {
                *d = *s;
            }
        }
    }
}

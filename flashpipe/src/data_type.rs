use std::fmt;

use bytemuck::Pod;
use half::{bf16, f16};
use num_traits::{Float, NumCast};
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    // Floating point
    BF16,
    F16,
    F32,
    F64,
    // Integers
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
}

impl DataType {
    pub const fn size_in_bits(&self) -> usize {
        match self {
            DataType::I8 | DataType::U8 => 8,
            DataType::I16 | DataType::U16 => 16,
            DataType::BF16 | DataType::F16 => 16,
            DataType::F32 | DataType::I32 | DataType::U32 => 32,
            DataType::F64 | DataType::I64 | DataType::U64 => 64,
        }
    }

    pub const fn size_in_bytes(&self) -> usize {
        self.size_in_bits().div_ceil(8)
    }

    /// The 16-bit float formats the attention kernel computes on.
    pub const fn is_reduced_precision_float(&self) -> bool {
        matches!(self, DataType::BF16 | DataType::F16)
    }
}

impl fmt::Display for DataType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            DataType::BF16 => "bf16",
            DataType::F16 => "f16",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::I8 => "i8",
            DataType::U8 => "u8",
            DataType::I16 => "i16",
            DataType::U16 => "u16",
            DataType::I32 => "i32",
            DataType::U32 => "u32",
            DataType::I64 => "i64",
            DataType::U64 => "u64",
        };
        f.write_str(name)
    }
}

pub trait ArrayElement: NumCast + Pod + Send + Sync {
    fn data_type() -> DataType;
}

macro_rules! impl_array_element {
    ($($type:ty => $variant:ident),+ $(,)?) => {
        $(
            impl ArrayElement for $type {
                fn data_type() -> DataType {
                    DataType::$variant
                }
            }
        )+
    };
}

impl_array_element! {
    f16 => F16,
    bf16 => BF16,
    f32 => F32,
    f64 => F64,
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
}

/// Element types the kernel stages and multiplies.
///
/// Tiles are stored in the reduced format; every arithmetic step widens to
/// f32 and only the probability matrix is narrowed back.
pub trait KernelElement: ArrayElement + Float + Default + fmt::Debug {
    fn narrow(value: f32) -> Self;
    fn widen(self) -> f32;
}

macro_rules! impl_kernel_element {
    ($($type:ty),+ $(,)?) => {
        $(
            impl KernelElement for $type {
                #[inline]
                fn narrow(value: f32) -> Self {
                    <$type>::from_f32(value)
                }

                #[inline]
                fn widen(self) -> f32 {
                    <$type>::to_f32(self)
                }
            }
        )+
    };
}

impl_kernel_element!(f16, bf16);

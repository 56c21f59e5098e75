//! Storage element types and their accumulators.

use core::fmt;
use core::ops::{Add, AddAssign, Mul};

use bytemuck::Pod;
use half::{bf16, f16};

/// Storage precision class of an element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Precision {
    /// Stored and accumulated at the same width (`f32`, `f64`).
    Full,
    /// Stored narrow, accumulated in `f32` (`f16`, `bf16`).
    Reduced,
}

/// Runtime tag for an element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F16,
    BF16,
    F32,
    F64,
}

impl DType {
    pub const fn name(self) -> &'static str {
        match self {
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }

    pub const fn size_in_bytes(self) -> usize {
        match self {
            DType::F16 | DType::BF16 => 2,
            DType::F32 => 4,
            DType::F64 => 8,
        }
    }

    pub const fn precision(self) -> Precision {
        match self {
            DType::F16 | DType::BF16 => Precision::Reduced,
            DType::F32 | DType::F64 => Precision::Full,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Type sums are accumulated in before narrowing back to storage.
pub trait Accumulator:
    Copy
    + fmt::Debug
    + PartialOrd
    + Add<Output = Self>
    + Mul<Output = Self>
    + AddAssign
    + Send
    + Sync
    + 'static
{
    const ZERO: Self;
}

impl Accumulator for f32 {
    const ZERO: Self = 0.0;
}

impl Accumulator for f64 {
    const ZERO: Self = 0.0;
}

/// Storage element of a tensor.
///
/// `Acc` is at least as wide as the storage type; kernels widen every load
/// with [`Element::to_acc`] and narrow once per output element.
pub trait Element: Copy + Default + PartialEq + fmt::Debug + Pod + Send + Sync + 'static {
    type Acc: Accumulator;
    const DTYPE: DType;

    fn to_acc(self) -> Self::Acc;
    fn from_acc(acc: Self::Acc) -> Self;

    fn from_f64(v: f64) -> Self;
    fn to_f64(self) -> f64;
}

impl Element for f32 {
    type Acc = f32;
    const DTYPE: DType = DType::F32;

    #[inline(always)]
    fn to_acc(self) -> f32 {
        self
    }
    #[inline(always)]
    fn from_acc(acc: f32) -> Self {
        acc
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Element for f64 {
    type Acc = f64;
    const DTYPE: DType = DType::F64;

    #[inline(always)]
    fn to_acc(self) -> f64 {
        self
    }
    #[inline(always)]
    fn from_acc(acc: f64) -> Self {
        acc
    }
    fn from_f64(v: f64) -> Self {
        v
    }
    fn to_f64(self) -> f64 {
        self
    }
}

impl Element for f16 {
    type Acc = f32;
    const DTYPE: DType = DType::F16;

    #[inline(always)]
    fn to_acc(self) -> f32 {
        self.to_f32()
    }
    #[inline(always)]
    fn from_acc(acc: f32) -> Self {
        f16::from_f32(acc)
    }
    fn from_f64(v: f64) -> Self {
        f16::from_f64(v)
    }
    fn to_f64(self) -> f64 {
        f16::to_f64(self)
    }
}

impl Element for bf16 {
    type Acc = f32;
    const DTYPE: DType = DType::BF16;

    #[inline(always)]
    fn to_acc(self) -> f32 {
        self.to_f32()
    }
    #[inline(always)]
    fn from_acc(acc: f32) -> Self {
        bf16::from_f32(acc)
    }
    fn from_f64(v: f64) -> Self {
        bf16::from_f64(v)
    }
    fn to_f64(self) -> f64 {
        bf16::to_f64(self)
    }
}

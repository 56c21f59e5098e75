//! Element types and strided host tensors for the neighborhood kernels.

#![no_std]

extern crate alloc;

mod element;
mod shape;
mod tensor;

pub use element::{Accumulator, DType, Element, Precision};
pub use shape::Shape;
pub use tensor::Tensor;

pub use half::{bf16, f16};

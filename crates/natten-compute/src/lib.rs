//! Neighborhood attention kernels on CPU and CUDA.
//!
//! Provides a `ComputeDevice` trait with backends for:
//! - CPU (always available, parallelized with rayon)
//! - CUDA (NVIDIA GPUs, runtime-compiled via NVRTC; `cuda` feature)
//!
//! and the validated operations built on top of it: [`qk_forward`],
//! [`qk_backward`], [`av_forward`], [`av_backward`] and
//! [`inverse_neighborhood`].

pub mod config;
pub mod cpu;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod kernels;
pub mod ops;
pub mod plan;
pub mod tensor;

#[cfg(feature = "cuda")]
pub mod cuda;

pub use config::{
    CpuConfig, Neighborhood, Neighborhood1d, Neighborhood2d, Neighborhood3d, NeighborhoodConfig,
};
pub use cpu::{CpuBuffer, CpuDevice};
pub use device::{ComputeBuffer, ComputeDevice, Location};
pub use dispatch::{Backend, BackendKind, Strategy};
pub use error::{NattenError, Result};
pub use ops::{
    av_backward, av_forward, inverse_neighborhood, qk_backward, qk_forward, AvGrads, QkGrads,
};
pub use plan::{Operand, Plan};
pub use tensor::ComputeTensor;

pub use natten_tensor::{bf16, f16, DType, Element, Precision, Shape, Tensor};

#[cfg(feature = "cuda")]
pub use cuda::{CudaBuffer, CudaComputeDevice};

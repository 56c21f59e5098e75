//! Error types for natten-compute.

use natten_tensor::DType;
use thiserror::Error;

use crate::device::Location;
use crate::dispatch::BackendKind;

pub type Result<T> = std::result::Result<T, NattenError>;

/// Everything that can stop a kernel call.
///
/// All variants except [`NattenError::Device`] are raised during validation,
/// before any output is written.
#[derive(Debug, Error)]
pub enum NattenError {
    #[error("{name} must be contiguous (shape {shape:?}, strides {strides:?})")]
    NonContiguous {
        name: &'static str,
        shape: Vec<usize>,
        strides: Vec<usize>,
    },

    #[error("{name} has rank {found}, expected {expected}")]
    RankMismatch {
        name: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("{name} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        name: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("relative position bias has shape {found:?}, expected {expected:?}")]
    BiasSpan {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("{name} is on {found}, but the call runs on {expected}")]
    LocationMismatch {
        name: &'static str,
        expected: Location,
        found: Location,
    },

    #[error("spatial rank {0} is not supported, expected 1, 2 or 3")]
    UnsupportedRank(usize),

    #[error("kernel size {kernel_size} on axis {axis} must be odd and at least 1")]
    InvalidKernelSize { axis: usize, kernel_size: usize },

    #[error("dilation on axis {axis} must be at least 1")]
    InvalidDilation { axis: usize },

    #[error("kernel size {kernel_size} exceeds extent {extent} on axis {axis}")]
    KernelExceedsExtent {
        axis: usize,
        kernel_size: usize,
        extent: usize,
    },

    #[error(
        "kernel size {kernel_size} at dilation {dilation} does not fit extent {extent} on axis {axis}"
    )]
    DilationExceedsExtent {
        axis: usize,
        kernel_size: usize,
        dilation: usize,
        extent: usize,
    },

    #[error("backend `{backend}` is unavailable: {reason}")]
    UnsupportedBackend { backend: String, reason: String },

    #[error("{backend} backend has no kernels for {dtype}")]
    UnsupportedDtype { backend: BackendKind, dtype: DType },

    #[error("invalid backend `{0}`, expected `cpu`, `cuda` or `cuda:<ordinal>`")]
    InvalidBackend(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("device error: {0}")]
    Device(String),
}

#[cfg(feature = "cuda")]
impl From<cudarc::driver::DriverError> for NattenError {
    fn from(e: cudarc::driver::DriverError) -> Self {
        Self::Device(e.to_string())
    }
}

#[cfg(feature = "cuda")]
impl From<cudarc::nvrtc::CompileError> for NattenError {
    fn from(e: cudarc::nvrtc::CompileError) -> Self {
        Self::Device(format!("kernel compilation failed: {e:?}"))
    }
}

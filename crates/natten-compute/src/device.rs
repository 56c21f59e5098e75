//! ComputeDevice and ComputeBuffer traits.

use std::fmt;

use natten_tensor::{DType, Element, Tensor};

use crate::dispatch::BackendKind;
use crate::error::{NattenError, Result};
use crate::plan::{Operand, Plan};
use crate::tensor::ComputeTensor;

/// Where a buffer lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Host,
    Cuda(usize),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Host => f.write_str("host"),
            Location::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
        }
    }
}

/// Device-resident flat storage of one element type.
pub trait ComputeBuffer: Send + Sync {
    type Elem: Element;

    /// Number of elements.
    fn len(&self) -> usize;
    /// Whether the buffer is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn location(&self) -> Location;
    /// Download contents to the host.
    fn to_vec(&self) -> Result<Vec<Self::Elem>>;
}

/// Compute device abstraction over the CPU and CUDA backends.
///
/// The four neighborhood primitives are the only kernels a backend has to
/// provide; every public operation in [`crate::ops`] is a composition of
/// them. Primitives receive a validated [`Plan`] and never see
/// inconsistent shapes. Each returns a freshly allocated contiguous buffer
/// of shape `[batch, heads, *spatial, channels]` (or `[heads, *rpb]` for
/// [`ComputeDevice::rpb_grad`]).
pub trait ComputeDevice: Send + Sync {
    /// The buffer type for this device.
    type Buffer<E: Element>: ComputeBuffer<Elem = E>;

    fn kind(&self) -> BackendKind;

    fn location(&self) -> Location;

    /// Whether this device has kernels for `dtype`.
    fn supports(&self, dtype: DType) -> bool;

    // -- Buffer lifecycle --

    /// Upload host data to the device.
    fn upload<E: Element>(&self, data: &[E]) -> Result<Self::Buffer<E>>;

    /// Allocate a zero-filled buffer of `len` elements.
    fn alloc_zeros<E: Element>(&self, len: usize) -> Result<Self::Buffer<E>>;

    /// Download buffer contents to the host.
    fn download<E: Element>(&self, buf: &Self::Buffer<E>) -> Result<Vec<E>> {
        buf.to_vec()
    }

    /// Upload a host tensor, keeping its strides.
    fn upload_tensor<E: Element>(
        &self,
        tensor: &Tensor<E>,
    ) -> Result<ComputeTensor<Self::Buffer<E>>> {
        let buffer = self.upload(tensor.data())?;
        ComputeTensor::from_strided(buffer, tensor.shape().clone(), tensor.strides().to_vec())
    }

    /// Download a device tensor into a host tensor with the same layout.
    fn download_tensor<E: Element>(
        &self,
        tensor: &ComputeTensor<Self::Buffer<E>>,
    ) -> Result<Tensor<E>> {
        let data = self.download(&tensor.buffer)?;
        let dims = tensor.shape().dims();
        Tensor::from_strided(data, dims, tensor.strides().to_vec()).ok_or_else(|| {
            NattenError::Device(format!("downloaded buffer does not fit shape {dims:?}"))
        })
    }

    // -- Neighborhood primitives --

    /// `out[p][t] = dot(a[p], b[tap(p, t)]) + bias[h][rel(p, t)]`.
    ///
    /// Output channels are the kernel volume.
    fn neighborhood_dot<E: Element>(
        &self,
        plan: &Plan,
        a: Operand<'_, Self::Buffer<E>>,
        b: Operand<'_, Self::Buffer<E>>,
        bias: Option<&Self::Buffer<E>>,
    ) -> Result<Self::Buffer<E>>;

    /// `out[p] = sum_t weights[p][t] * values[tap(p, t)]`.
    ///
    /// Output channels are those of `values`.
    fn neighborhood_gather<E: Element>(
        &self,
        plan: &Plan,
        weights: Operand<'_, Self::Buffer<E>>,
        values: Operand<'_, Self::Buffer<E>>,
    ) -> Result<Self::Buffer<E>>;

    /// `out[i] = sum over producers q of i: weights[q][tap_of(q, i)] * values[q]`.
    ///
    /// Output channels are those of `values`.
    fn inverse_neighborhood<E: Element>(
        &self,
        plan: &Plan,
        weights: Operand<'_, Self::Buffer<E>>,
        values: Operand<'_, Self::Buffer<E>>,
    ) -> Result<Self::Buffer<E>>;

    /// `out[h][o] = sum over (b, p, t) with rel(p, t) = o of d_logits[b][h][p][t]`.
    fn rpb_grad<E: Element>(
        &self,
        plan: &Plan,
        d_logits: Operand<'_, Self::Buffer<E>>,
    ) -> Result<Self::Buffer<E>>;

    /// Block until queued work has finished.
    fn synchronize(&self) -> Result<()>;
}

//! Shape-tracked buffer wrapper for ComputeDevice buffers.

use natten_tensor::{Element, Shape};

use crate::device::{ComputeBuffer, ComputeDevice, Location};
use crate::error::{NattenError, Result};

/// A tensor: a device buffer paired with shape and stride metadata.
pub struct ComputeTensor<B: ComputeBuffer> {
    pub buffer: B,
    shape: Shape,
    strides: Vec<usize>,
}

impl<B: ComputeBuffer> ComputeTensor<B> {
    /// Upload row-major data to the device with the given shape.
    pub fn from_data<D>(dev: &D, data: &[B::Elem], shape: &[usize]) -> Result<Self>
    where
        D: ComputeDevice<Buffer<B::Elem> = B>,
    {
        Self::from_buffer(dev.upload(data)?, Shape::from_slice(shape))
    }

    /// Wrap an existing buffer as a contiguous tensor.
    pub fn from_buffer(buffer: B, shape: Shape) -> Result<Self> {
        if buffer.len() != shape.numel() {
            return Err(NattenError::ShapeMismatch {
                name: "buffer",
                expected: vec![shape.numel()],
                found: vec![buffer.len()],
            });
        }
        let strides = shape.contiguous_strides();
        Ok(Self {
            buffer,
            shape,
            strides,
        })
    }

    /// Wrap an existing buffer with explicit strides.
    pub fn from_strided(buffer: B, shape: Shape, strides: Vec<usize>) -> Result<Self> {
        if strides.len() != shape.ndim() {
            return Err(NattenError::RankMismatch {
                name: "strides",
                expected: shape.ndim(),
                found: strides.len(),
            });
        }
        if shape.numel() > 0 {
            let furthest: usize = shape
                .dims()
                .iter()
                .zip(&strides)
                .map(|(d, s)| (d - 1) * s)
                .sum();
            if furthest >= buffer.len() {
                return Err(NattenError::ShapeMismatch {
                    name: "buffer",
                    expected: vec![furthest + 1],
                    found: vec![buffer.len()],
                });
            }
        }
        Ok(Self {
            buffer,
            shape,
            strides,
        })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    pub fn location(&self) -> Location {
        self.buffer.location()
    }

    /// Whether strides are row-major for the shape. Unit axes are ignored.
    pub fn is_contiguous(&self) -> bool {
        let expected = self.shape.contiguous_strides();
        self.shape
            .dims()
            .iter()
            .zip(self.strides.iter().zip(&expected))
            .all(|(&d, (s, e))| d == 1 || s == e)
    }

    /// Download contents in storage order.
    pub fn to_vec(&self) -> Result<Vec<B::Elem>> {
        self.buffer.to_vec()
    }

    /// Download as `f64`, in storage order.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        Ok(self.to_vec()?.into_iter().map(Element::to_f64).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::{CpuBuffer, CpuDevice};

    #[test]
    fn from_data_is_contiguous() {
        let dev = CpuDevice::new();
        let t: ComputeTensor<CpuBuffer<f32>> =
            ComputeTensor::from_data(&dev, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[1, 2, 3]).unwrap();
        assert_eq!(t.strides(), &[6, 3, 1]);
        assert!(t.is_contiguous());
        assert_eq!(t.location(), Location::Host);
        assert_eq!(t.to_f64_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn buffer_length_must_match_shape() {
        let buf = CpuBuffer::from_vec(vec![0.0f32; 5]);
        assert!(matches!(
            ComputeTensor::from_buffer(buf, Shape::from_slice(&[2, 3])),
            Err(NattenError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn strided_view_bounds() {
        let t = ComputeTensor::from_strided(
            CpuBuffer::from_vec(vec![0.0f64; 6]),
            Shape::from_slice(&[3, 2]),
            vec![1, 3],
        )
        .unwrap();
        assert!(!t.is_contiguous());
        assert!(matches!(
            ComputeTensor::from_strided(
                CpuBuffer::from_vec(vec![0.0f64; 6]),
                Shape::from_slice(&[3, 2]),
                vec![2, 3],
            ),
            Err(NattenError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            ComputeTensor::from_strided(
                CpuBuffer::from_vec(vec![0.0f64; 6]),
                Shape::from_slice(&[3, 2]),
                vec![1],
            ),
            Err(NattenError::RankMismatch { .. })
        ));
    }
}

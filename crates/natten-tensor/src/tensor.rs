use crate::{Element, Shape};
use alloc::vec::Vec;

/// N-dimensional host tensor with explicit strides.
///
/// Freshly built tensors are contiguous row-major. [`Tensor::permuted`]
/// produces a strided view of the same storage, which is how callers end up
/// handing non-contiguous operands to the kernels.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<E: Element> {
    data: Vec<E>,
    shape: Shape,
    strides: Vec<usize>,
}

impl<E: Element> Tensor<E> {
    /// Create a tensor from flat row-major data and shape.
    ///
    /// Returns `None` if `data.len()` does not match the shape.
    pub fn new(data: Vec<E>, shape: impl Into<Shape>) -> Option<Self> {
        let shape = shape.into();
        if data.len() != shape.numel() {
            return None;
        }
        let strides = shape.contiguous_strides();
        Some(Self {
            data,
            shape,
            strides,
        })
    }

    /// Wrap storage with arbitrary strides.
    ///
    /// Returns `None` if the stride count differs from the rank or the
    /// furthest addressed element lies outside `data`.
    pub fn from_strided(
        data: Vec<E>,
        shape: impl Into<Shape>,
        strides: Vec<usize>,
    ) -> Option<Self> {
        let shape = shape.into();
        if strides.len() != shape.ndim() {
            return None;
        }
        if shape.numel() > 0 {
            let last: usize = shape
                .dims()
                .iter()
                .zip(&strides)
                .map(|(d, s)| (d - 1) * s)
                .sum();
            if last >= data.len() {
                return None;
            }
        }
        Some(Self {
            data,
            shape,
            strides,
        })
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(shape: impl Into<Shape>) -> Self {
        let shape = shape.into();
        let strides = shape.contiguous_strides();
        Self {
            data: alloc::vec![E::default(); shape.numel()],
            shape,
            strides,
        }
    }

    /// Create a tensor from a closure over multi-indices.
    pub fn from_fn(shape: impl Into<Shape>, f: impl Fn(&[usize]) -> E) -> Self {
        let shape = shape.into();
        let n = shape.numel();
        let strides = shape.contiguous_strides();
        let ndim = shape.ndim();
        let mut data = Vec::with_capacity(n);
        let mut idx = alloc::vec![0usize; ndim];

        for _ in 0..n {
            data.push(f(&idx));
            // Increment multi-index
            for d in (0..ndim).rev() {
                idx[d] += 1;
                if idx[d] < shape[d] {
                    break;
                }
                idx[d] = 0;
            }
        }
        Self {
            data,
            shape,
            strides,
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }
    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }
    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// Underlying storage, in storage order.
    pub fn data(&self) -> &[E] {
        &self.data
    }
    pub fn data_mut(&mut self) -> &mut [E] {
        &mut self.data
    }
    pub fn into_data(self) -> Vec<E> {
        self.data
    }

    /// Whether strides match contiguous layout.
    pub fn is_contiguous(&self) -> bool {
        self.strides == self.shape.contiguous_strides()
    }

    /// Flat storage offset of a multi-index.
    fn flat_index(&self, idx: &[usize]) -> usize {
        debug_assert_eq!(idx.len(), self.ndim());
        idx.iter()
            .zip(self.strides.iter())
            .map(|(i, s)| i * s)
            .sum()
    }

    /// Get element by multi-index.
    pub fn get(&self, idx: &[usize]) -> E {
        self.data[self.flat_index(idx)]
    }

    /// Set element by multi-index.
    pub fn set(&mut self, idx: &[usize], val: E) {
        let fi = self.flat_index(idx);
        self.data[fi] = val;
    }

    /// Reorder axes without moving data. `axes[i]` is the source axis of
    /// output axis `i`.
    pub fn permuted(&self, axes: &[usize]) -> Option<Self> {
        let nd = self.ndim();
        if axes.len() != nd || (0..nd).any(|a| !axes.contains(&a)) {
            return None;
        }
        let dims = axes.iter().map(|&a| self.shape[a]).collect();
        let strides = axes.iter().map(|&a| self.strides[a]).collect();
        Some(Self {
            data: self.data.clone(),
            shape: Shape::new(dims),
            strides,
        })
    }

    /// Copy into contiguous row-major order.
    pub fn to_contiguous(&self) -> Self {
        if self.is_contiguous() {
            return self.clone();
        }
        Self::from_fn(self.shape.clone(), |idx| self.get(idx))
    }

    /// Element-wise conversion through `f64`.
    pub fn cast<F: Element>(&self) -> Tensor<F> {
        Tensor::from_fn(self.shape.clone(), |idx| F::from_f64(self.get(idx).to_f64()))
    }

    /// Elements in row-major order as `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.to_contiguous().data.iter().map(|v| v.to_f64()).collect()
    }
}

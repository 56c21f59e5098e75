//! Validated call geometry shared by every backend.
//!
//! A [`Plan`] is built once per public operation, after which the kernels
//! index without further checks. Operands are described in the padded
//! six-axis form `[batch, heads, s0, s1, s2, channels]`; axes missing from a
//! lower-rank grid get stride 0.

use natten_tensor::Element;
use natten_window::{WindowGrid, WindowTable, MAX_RANK};

use crate::config::Neighborhood;
use crate::device::{ComputeBuffer, ComputeDevice, Location};
use crate::dispatch::Strategy;
use crate::error::{NattenError, Result};
use crate::tensor::ComputeTensor;

/// Number of axes of a padded operand.
pub const OPERAND_AXES: usize = MAX_RANK + 3;

/// Read-only view of a validated input.
pub struct Operand<'a, B> {
    pub buffer: &'a B,
    /// Padded strides `[batch, heads, s0, s1, s2, channels]`.
    pub strides: [usize; OPERAND_AXES],
    pub channels: usize,
}

impl<B> Clone for Operand<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for Operand<'_, B> {}

impl<B> Operand<'_, B> {
    /// Storage offset of channel 0 at `(batch, head, pos)`.
    #[inline]
    pub fn offset(&self, batch: usize, head: usize, pos: [usize; MAX_RANK]) -> usize {
        let s = &self.strides;
        batch * s[0] + head * s[1] + pos[0] * s[2] + pos[1] * s[3] + pos[2] * s[4]
    }

    /// Stride between consecutive channels.
    #[inline]
    pub fn channel_stride(&self) -> usize {
        self.strides[OPERAND_AXES - 1]
    }
}

/// Geometry and dispatch decision for one call.
#[derive(Debug, Clone)]
pub struct Plan {
    strategy: Strategy,
    location: Location,
    batch: usize,
    heads: usize,
    spatial: Vec<usize>,
    grid: WindowGrid,
    table: WindowTable,
}

impl Plan {
    /// Validate `anchor` (a `[batch, heads, *spatial, channels]` tensor) and
    /// derive the grid from its spatial extents.
    pub fn new<D, B, const R: usize>(
        dev: &D,
        nbhd: &Neighborhood<R>,
        anchor: &ComputeTensor<B>,
        name: &'static str,
    ) -> Result<Self>
    where
        D: ComputeDevice,
        B: ComputeBuffer,
    {
        let strategy = Strategy::resolve(dev, <B::Elem as Element>::DTYPE)?;
        let location = dev.location();
        check_layout(anchor, name, location)?;
        let dims = anchor.shape().dims();
        if dims.len() != R + 3 {
            return Err(NattenError::RankMismatch {
                name,
                expected: R + 3,
                found: dims.len(),
            });
        }
        let spatial = dims[2..2 + R].to_vec();
        let grid = nbhd.grid(&spatial)?;
        let table = grid.table();
        Ok(Self {
            strategy,
            location,
            batch: dims[0],
            heads: dims[1],
            spatial,
            grid,
            table,
        })
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn heads(&self) -> usize {
        self.heads
    }

    /// Spatial extents as given by the caller, without padding.
    pub fn spatial(&self) -> &[usize] {
        &self.spatial
    }

    pub fn grid(&self) -> &WindowGrid {
        &self.grid
    }

    pub fn table(&self) -> &WindowTable {
        &self.table
    }

    /// Number of `(batch, head, position)` rows.
    pub fn rows(&self) -> usize {
        self.batch * self.heads * self.grid.num_positions()
    }

    /// Split a row index into batch, head and padded position.
    #[inline]
    pub fn split_row(&self, row: usize) -> (usize, usize, [usize; MAX_RANK]) {
        let positions = self.grid.num_positions();
        let pos = self.grid.split_position(row % positions);
        let bh = row / positions;
        (bh / self.heads, bh % self.heads, pos)
    }

    /// `[batch, heads, *spatial, channels]`.
    pub fn dims(&self, channels: usize) -> Vec<usize> {
        let mut dims = Vec::with_capacity(self.spatial.len() + 3);
        dims.push(self.batch);
        dims.push(self.heads);
        dims.extend_from_slice(&self.spatial);
        dims.push(channels);
        dims
    }

    /// `[heads, *(2 * kernel_size - 1)]`.
    pub fn rpb_dims(&self) -> Vec<usize> {
        let mut dims = Vec::with_capacity(self.spatial.len() + 1);
        dims.push(self.heads);
        dims.extend(self.grid.spatial_axes().iter().map(|a| a.rpb_span()));
        dims
    }

    /// Validate a `[batch, heads, *spatial, channels]` tensor against the
    /// plan and return its channel count.
    ///
    /// With `channels = None` any channel count is accepted.
    pub fn check<B: ComputeBuffer>(
        &self,
        tensor: &ComputeTensor<B>,
        name: &'static str,
        channels: Option<usize>,
    ) -> Result<usize> {
        check_layout(tensor, name, self.location)?;
        let found = tensor.shape().dims();
        let c = channels.unwrap_or_else(|| found.last().copied().unwrap_or(0));
        let expected = self.dims(c);
        if found.len() != expected.len() {
            return Err(NattenError::RankMismatch {
                name,
                expected: expected.len(),
                found: found.len(),
            });
        }
        if found != expected.as_slice() {
            return Err(NattenError::ShapeMismatch {
                name,
                expected,
                found: found.to_vec(),
            });
        }
        Ok(c)
    }

    /// Validate a relative position bias tensor.
    pub fn check_bias<B: ComputeBuffer>(&self, bias: &ComputeTensor<B>) -> Result<()> {
        check_layout(bias, "rpb", self.location)?;
        let expected = self.rpb_dims();
        let found = bias.shape().dims();
        if found != expected.as_slice() {
            return Err(NattenError::BiasSpan {
                expected,
                found: found.to_vec(),
            });
        }
        Ok(())
    }

    /// Padded view of a tensor already accepted by [`Plan::check`].
    pub fn operand<'a, B: ComputeBuffer>(&self, tensor: &'a ComputeTensor<B>) -> Operand<'a, B> {
        let s = tensor.strides();
        let rank = self.spatial.len();
        let mut strides = [0; OPERAND_AXES];
        strides[0] = s[0];
        strides[1] = s[1];
        strides[2 + MAX_RANK - rank..2 + MAX_RANK].copy_from_slice(&s[2..2 + rank]);
        strides[OPERAND_AXES - 1] = s[rank + 2];
        Operand {
            buffer: &tensor.buffer,
            strides,
            channels: tensor.shape().last(),
        }
    }
}

fn check_layout<B: ComputeBuffer>(
    tensor: &ComputeTensor<B>,
    name: &'static str,
    location: Location,
) -> Result<()> {
    if tensor.location() != location {
        return Err(NattenError::LocationMismatch {
            name,
            expected: location,
            found: tensor.location(),
        });
    }
    if !tensor.is_contiguous() {
        return Err(NattenError::NonContiguous {
            name,
            shape: tensor.shape().dims().to_vec(),
            strides: tensor.strides().to_vec(),
        });
    }
    Ok(())
}

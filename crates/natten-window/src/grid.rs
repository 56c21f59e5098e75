//! Rank padding and precomputed window tables.

use alloc::vec::Vec;

use crate::AxisWindow;

/// Highest spatial rank the kernels support.
pub const MAX_RANK: usize = 3;

/// Window geometry of a 1D, 2D or 3D grid, padded to three axes.
///
/// Lower-rank grids get leading unit axes (extent 1, kernel 1, dilation 1),
/// which leaves flat tap and bias indices unchanged. Kernels therefore only
/// ever see the three-axis form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowGrid {
    axes: [AxisWindow; MAX_RANK],
    rank: usize,
}

impl WindowGrid {
    /// Build from one window per spatial axis (outermost first).
    ///
    /// Returns `None` for an empty slice or more than [`MAX_RANK`] axes.
    pub fn from_axes(axes: &[AxisWindow]) -> Option<Self> {
        let rank = axes.len();
        if rank == 0 || rank > MAX_RANK {
            return None;
        }
        let mut padded = [AxisWindow::unit(); MAX_RANK];
        padded[MAX_RANK - rank..].copy_from_slice(axes);
        Some(Self {
            axes: padded,
            rank,
        })
    }

    /// Spatial rank before padding.
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn axes(&self) -> &[AxisWindow; MAX_RANK] {
        &self.axes
    }

    /// Axes actually present, without padding.
    pub fn spatial_axes(&self) -> &[AxisWindow] {
        &self.axes[MAX_RANK - self.rank..]
    }

    pub fn extents(&self) -> [usize; MAX_RANK] {
        self.axes.map(|a| a.extent())
    }

    pub fn kernel_sizes(&self) -> [usize; MAX_RANK] {
        self.axes.map(|a| a.kernel_size())
    }

    pub fn dilations(&self) -> [usize; MAX_RANK] {
        self.axes.map(|a| a.dilation())
    }

    /// Number of spatial positions.
    pub fn num_positions(&self) -> usize {
        self.axes.iter().map(|a| a.extent()).product()
    }

    /// Taps per window, the size of the trailing logits axis.
    pub fn kernel_volume(&self) -> usize {
        self.axes.iter().map(|a| a.kernel_size()).product()
    }

    /// Bias entries per head.
    pub fn rpb_volume(&self) -> usize {
        self.axes.iter().map(|a| a.rpb_span()).product()
    }

    /// Row-major flat tap index from per-axis taps.
    #[inline]
    pub fn tap_index(&self, taps: [usize; MAX_RANK]) -> usize {
        let [k0, k1, k2] = self.kernel_sizes();
        debug_assert!(taps[0] < k0 && taps[1] < k1 && taps[2] < k2);
        (taps[0] * k1 + taps[1]) * k2 + taps[2]
    }

    /// Inverse of [`WindowGrid::tap_index`].
    #[inline]
    pub fn split_tap(&self, flat: usize) -> [usize; MAX_RANK] {
        let [_, k1, k2] = self.kernel_sizes();
        [flat / (k1 * k2), (flat / k2) % k1, flat % k2]
    }

    /// Row-major flat bias index (within one head) from per-axis offsets.
    #[inline]
    pub fn rpb_index(&self, offsets: [usize; MAX_RANK]) -> usize {
        let s1 = self.axes[1].rpb_span();
        let s2 = self.axes[2].rpb_span();
        (offsets[0] * s1 + offsets[1]) * s2 + offsets[2]
    }

    /// Inverse of [`WindowGrid::rpb_index`].
    #[inline]
    pub fn split_rpb(&self, flat: usize) -> [usize; MAX_RANK] {
        let s1 = self.axes[1].rpb_span();
        let s2 = self.axes[2].rpb_span();
        [flat / (s1 * s2), (flat / s2) % s1, flat % s2]
    }

    /// Split a flat spatial position into per-axis coordinates.
    #[inline]
    pub fn split_position(&self, flat: usize) -> [usize; MAX_RANK] {
        let [_, e1, e2] = self.extents();
        [flat / (e1 * e2), (flat / e2) % e1, flat % e2]
    }

    /// Tabulate every axis.
    pub fn table(&self) -> WindowTable {
        WindowTable {
            axes: self.axes.map(|a| AxisTable::build(&a)),
        }
    }
}

/// Precomputed window bounds for every position along one axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisTable {
    pub start: Vec<usize>,
    pub backward_start: Vec<usize>,
    pub backward_end: Vec<usize>,
    pub rpb_start: Vec<usize>,
    pub dilation: usize,
}

impl AxisTable {
    pub fn build(axis: &AxisWindow) -> Self {
        let n = axis.extent();
        let mut table = Self {
            start: Vec::with_capacity(n),
            backward_start: Vec::with_capacity(n),
            backward_end: Vec::with_capacity(n),
            rpb_start: Vec::with_capacity(n),
            dilation: axis.dilation(),
        };
        for i in 0..n {
            table.start.push(axis.window_start(i));
            table.backward_start.push(axis.backward_window_start(i));
            table.backward_end.push(axis.backward_window_end(i));
            table.rpb_start.push(axis.rpb_start(i));
        }
        table
    }

    pub fn extent(&self) -> usize {
        self.start.len()
    }
}

/// Window tables for all three (padded) axes.
///
/// This is what both backends index into, so the boundary arithmetic of
/// [`AxisWindow`] is evaluated in exactly one place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowTable {
    pub axes: [AxisTable; MAX_RANK],
}

impl WindowTable {
    /// Forward window start of `pos` on every axis.
    #[inline]
    pub fn starts(&self, pos: [usize; MAX_RANK]) -> [usize; MAX_RANK] {
        [
            self.axes[0].start[pos[0]],
            self.axes[1].start[pos[1]],
            self.axes[2].start[pos[2]],
        ]
    }

    /// Bias index of tap 0 for `pos` on every axis.
    #[inline]
    pub fn rpb_starts(&self, pos: [usize; MAX_RANK]) -> [usize; MAX_RANK] {
        [
            self.axes[0].rpb_start[pos[0]],
            self.axes[1].rpb_start[pos[1]],
            self.axes[2].rpb_start[pos[2]],
        ]
    }

    /// Half-open producer range `(start, end)` of `pos` on every axis,
    /// to be stepped by the axis dilation.
    #[inline]
    pub fn backward_ranges(&self, pos: [usize; MAX_RANK]) -> [(usize, usize); MAX_RANK] {
        [0, 1, 2].map(|a| {
            (
                self.axes[a].backward_start[pos[a]],
                self.axes[a].backward_end[pos[a]],
            )
        })
    }

    pub fn dilations(&self) -> [usize; MAX_RANK] {
        [0, 1, 2].map(|a| self.axes[a].dilation)
    }

    /// Pack as `u32` for device upload.
    ///
    /// Axis `a` occupies `4 * extent[a]` entries starting at
    /// `4 * (extent[0] + .. + extent[a-1])`, ordered start, backward start,
    /// backward end, rpb start. Returns `None` if any entry overflows `u32`.
    pub fn packed_u32(&self) -> Option<Vec<u32>> {
        let total: usize = self.axes.iter().map(|t| 4 * t.extent()).sum();
        let mut out = Vec::with_capacity(total);
        for axis in &self.axes {
            for column in [
                &axis.start,
                &axis.backward_start,
                &axis.backward_end,
                &axis.rpb_start,
            ] {
                for &v in column.iter() {
                    out.push(u32::try_from(v).ok()?);
                }
            }
        }
        Some(out)
    }
}

//! Per-axis window arithmetic.

use core::iter::StepBy;
use core::ops::Range;

/// Window geometry along a single spatial axis.
///
/// Positions sharing a residue modulo `dilation` form independent classes;
/// a window only ever contains positions of its own class. Windows are
/// shifted, never shrunk, at the boundaries, so every position sees exactly
/// `kernel_size` taps.
///
/// Construction does not validate. Use [`AxisWindow::is_valid`] (or the
/// checks in `natten-compute`) before indexing: the arithmetic assumes an odd
/// `kernel_size >= 1`, `dilation >= 1` and `kernel_size * dilation <= extent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AxisWindow {
    extent: usize,
    kernel_size: usize,
    dilation: usize,
}

impl AxisWindow {
    pub const fn new(extent: usize, kernel_size: usize, dilation: usize) -> Self {
        Self {
            extent,
            kernel_size,
            dilation,
        }
    }

    /// Degenerate axis used to pad lower-rank grids up to three axes.
    pub const fn unit() -> Self {
        Self::new(1, 1, 1)
    }

    pub const fn extent(&self) -> usize {
        self.extent
    }

    pub const fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    pub const fn dilation(&self) -> usize {
        self.dilation
    }

    /// Window radius, `kernel_size / 2`.
    pub const fn neighborhood_size(&self) -> usize {
        self.kernel_size / 2
    }

    /// Number of distinct relative offsets, `2 * kernel_size - 1`.
    pub const fn rpb_span(&self) -> usize {
        2 * self.kernel_size - 1
    }

    pub const fn is_valid(&self) -> bool {
        self.kernel_size % 2 == 1
            && self.dilation >= 1
            && self.kernel_size * self.dilation <= self.extent
    }

    /// Number of positions in the dilation class of `index`.
    #[inline]
    fn class_len(&self, index: usize) -> usize {
        let residue = index % self.dilation;
        (self.extent - residue).div_ceil(self.dilation)
    }

    /// First tap of the forward window of `index`.
    #[inline]
    pub fn window_start(&self, index: usize) -> usize {
        if self.dilation == 1 {
            return index
                .saturating_sub(self.neighborhood_size())
                .min(self.extent - self.kernel_size);
        }
        let residue = index % self.dilation;
        let slot = (index / self.dilation)
            .saturating_sub(self.neighborhood_size())
            .min(self.class_len(index) - self.kernel_size);
        residue + slot * self.dilation
    }

    /// One past the last tap of the forward window of `index`.
    #[inline]
    pub fn window_end(&self, index: usize) -> usize {
        self.window_start(index) + (self.kernel_size - 1) * self.dilation + 1
    }

    /// Positions in the forward window of `index`, in tap order.
    pub fn taps(&self, index: usize) -> StepBy<Range<usize>> {
        (self.window_start(index)..self.window_end(index)).step_by(self.dilation)
    }

    /// First position whose forward window may contain `index`.
    #[inline]
    pub fn backward_window_start(&self, index: usize) -> usize {
        if index < self.kernel_size * self.dilation {
            index % self.dilation
        } else {
            index - self.neighborhood_size() * self.dilation
        }
    }

    /// One past the last position whose forward window contains `index`.
    #[inline]
    pub fn backward_window_end(&self, index: usize) -> usize {
        if index + self.kernel_size * self.dilation >= self.extent {
            self.extent
        } else {
            index + (self.neighborhood_size() + 1) * self.dilation
        }
    }

    /// Positions whose forward window contains `index`.
    pub fn producers(&self, index: usize) -> StepBy<Range<usize>> {
        (self.backward_window_start(index)..self.backward_window_end(index))
            .step_by(self.dilation)
    }

    /// Bias index of tap 0 in the window of `index`.
    ///
    /// Tap `t` maps to `rpb_start(index) + t`, which equals
    /// `kernel_size - 1 + (key - index) / dilation`.
    #[inline]
    pub fn rpb_start(&self, index: usize) -> usize {
        self.kernel_size - 1 - (index - self.window_start(index)) / self.dilation
    }

    /// Tap index of `position` inside the window of `producer`, if any.
    pub fn tap_of(&self, producer: usize, position: usize) -> Option<usize> {
        let start = self.window_start(producer);
        if position < start || (position - start) % self.dilation != 0 {
            return None;
        }
        let tap = (position - start) / self.dilation;
        (tap < self.kernel_size).then_some(tap)
    }
}

//! Neighborhood shape and backend configuration.

use natten_window::{AxisWindow, WindowGrid, MAX_RANK};
use serde::{Deserialize, Serialize};

use crate::error::{NattenError, Result};

/// Kernel size and dilation per spatial axis, outermost axis first.
///
/// Validated on construction (odd kernel sizes, nonzero dilations, rank
/// 1 to 3). Fitting the window into a grid is checked per call by
/// [`Neighborhood::grid`], since extents come from the tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Neighborhood<const R: usize> {
    kernel_size: [usize; R],
    dilation: [usize; R],
}

pub type Neighborhood1d = Neighborhood<1>;
pub type Neighborhood2d = Neighborhood<2>;
pub type Neighborhood3d = Neighborhood<3>;

impl<const R: usize> Neighborhood<R> {
    pub fn new(kernel_size: [usize; R], dilation: [usize; R]) -> Result<Self> {
        if R == 0 || R > MAX_RANK {
            return Err(NattenError::UnsupportedRank(R));
        }
        for axis in 0..R {
            let k = kernel_size[axis];
            if k == 0 || k % 2 == 0 {
                return Err(NattenError::InvalidKernelSize {
                    axis,
                    kernel_size: k,
                });
            }
            if dilation[axis] == 0 {
                return Err(NattenError::InvalidDilation { axis });
            }
        }
        Ok(Self {
            kernel_size,
            dilation,
        })
    }

    /// Same kernel size and dilation on every axis.
    pub fn square(kernel_size: usize, dilation: usize) -> Result<Self> {
        Self::new([kernel_size; R], [dilation; R])
    }

    /// Replace the dilations, revalidating.
    pub fn with_dilation(self, dilation: [usize; R]) -> Result<Self> {
        Self::new(self.kernel_size, dilation)
    }

    pub fn kernel_size(&self) -> &[usize; R] {
        &self.kernel_size
    }

    pub fn dilation(&self) -> &[usize; R] {
        &self.dilation
    }

    pub fn kernel_volume(&self) -> usize {
        self.kernel_size.iter().product()
    }

    /// Expected bias shape: `[heads, 2k-1, ...]`.
    pub fn rpb_shape(&self, heads: usize) -> Vec<usize> {
        std::iter::once(heads)
            .chain(self.kernel_size.iter().map(|k| 2 * k - 1))
            .collect()
    }

    /// Fit the neighborhood onto a grid with the given spatial extents.
    pub fn grid(&self, extents: &[usize]) -> Result<WindowGrid> {
        if extents.len() != R {
            return Err(NattenError::UnsupportedRank(extents.len()));
        }
        let mut axes = [AxisWindow::unit(); MAX_RANK];
        for (axis, &extent) in extents.iter().enumerate() {
            let kernel_size = self.kernel_size[axis];
            let dilation = self.dilation[axis];
            if kernel_size > extent {
                return Err(NattenError::KernelExceedsExtent {
                    axis,
                    kernel_size,
                    extent,
                });
            }
            if kernel_size * dilation > extent {
                return Err(NattenError::DilationExceedsExtent {
                    axis,
                    kernel_size,
                    dilation,
                    extent,
                });
            }
            axes[axis] = AxisWindow::new(extent, kernel_size, dilation);
        }
        WindowGrid::from_axes(&axes[..R]).ok_or(NattenError::UnsupportedRank(R))
    }
}

/// Serializable form of [`Neighborhood`].
///
/// A single-element `kernel_size` or `dilation` applies to every axis;
/// a missing `dilation` means 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborhoodConfig {
    pub kernel_size: Vec<usize>,
    #[serde(default)]
    pub dilation: Option<Vec<usize>>,
}

impl NeighborhoodConfig {
    pub fn resolve<const R: usize>(&self) -> Result<Neighborhood<R>> {
        let kernel_size = broadcast::<R>("kernel_size", &self.kernel_size)?;
        let dilation = match &self.dilation {
            Some(d) => broadcast::<R>("dilation", d)?,
            None => [1; R],
        };
        Neighborhood::new(kernel_size, dilation)
    }
}

impl<const R: usize> From<Neighborhood<R>> for NeighborhoodConfig {
    fn from(n: Neighborhood<R>) -> Self {
        Self {
            kernel_size: n.kernel_size.to_vec(),
            dilation: Some(n.dilation.to_vec()),
        }
    }
}

fn broadcast<const R: usize>(field: &str, values: &[usize]) -> Result<[usize; R]> {
    match values {
        [v] => Ok([*v; R]),
        _ => values.try_into().map_err(|_| {
            NattenError::Config(format!(
                "`{field}` has {} entries, expected 1 or {R}",
                values.len()
            ))
        }),
    }
}

/// CPU backend settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuConfig {
    /// Worker threads for a dedicated pool; `None` uses rayon's global pool.
    #[serde(default)]
    pub num_threads: Option<usize>,
}

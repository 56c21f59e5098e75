//! CPU compute backend, parallelized with rayon.
//!
//! Every primitive is written in gather form: each output row is owned by
//! exactly one task, which reads whatever inputs it needs and writes only
//! its own chunk. No locks or atomics are involved.

use natten_tensor::{Accumulator, DType, Element};
use natten_window::{AxisTable, WindowGrid, MAX_RANK};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::config::CpuConfig;
use crate::device::{ComputeBuffer, ComputeDevice, Location};
use crate::dispatch::BackendKind;
use crate::error::Result;
use crate::plan::{Operand, Plan};

/// CPU buffer: just a `Vec<E>`.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuBuffer<E> {
    data: Vec<E>,
}

impl<E: Element> CpuBuffer<E> {
    pub fn from_vec(data: Vec<E>) -> Self {
        Self { data }
    }

    pub fn as_slice(&self) -> &[E] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<E> {
        self.data
    }
}

impl<E: Element> ComputeBuffer for CpuBuffer<E> {
    type Elem = E;

    fn len(&self) -> usize {
        self.data.len()
    }

    fn location(&self) -> Location {
        Location::Host
    }

    fn to_vec(&self) -> Result<Vec<E>> {
        Ok(self.data.clone())
    }
}

/// CPU compute device.
///
/// Runs on rayon's global pool unless [`CpuConfig::num_threads`] asks for a
/// dedicated one.
#[derive(Default)]
pub struct CpuDevice {
    pool: Option<ThreadPool>,
}

impl CpuDevice {
    pub fn new() -> Self {
        Self { pool: None }
    }

    pub fn with_config(config: &CpuConfig) -> Result<Self> {
        let pool = match config.num_threads {
            Some(n) => {
                let pool = ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("natten-cpu-{i}"))
                    .build()?;
                debug!(threads = n, "built dedicated cpu pool");
                Some(pool)
            }
            None => None,
        };
        Ok(Self { pool })
    }

    /// Worker threads kernels will run on.
    pub fn num_threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }
}

/// Visit every tap of the window starting at `start`, in row-major tap
/// order, passing the flat tap index, per-axis taps and key position.
#[inline]
fn for_each_tap(
    grid: &WindowGrid,
    start: [usize; MAX_RANK],
    mut f: impl FnMut(usize, [usize; MAX_RANK], [usize; MAX_RANK]),
) {
    let [k0, k1, k2] = grid.kernel_sizes();
    let [d0, d1, d2] = grid.dilations();
    let mut tap = 0;
    for t0 in 0..k0 {
        let x0 = start[0] + t0 * d0;
        for t1 in 0..k1 {
            let x1 = start[1] + t1 * d1;
            for t2 in 0..k2 {
                f(tap, [t0, t1, t2], [x0, x1, start[2] + t2 * d2]);
                tap += 1;
            }
        }
    }
}

/// Positions whose window contains `i` on one axis, with the tap `i`
/// occupies in each of them.
#[inline]
fn producers(
    table: &AxisTable,
    kernel_size: usize,
    i: usize,
) -> impl Iterator<Item = (usize, usize)> + '_ {
    let d = table.dilation;
    (table.backward_start[i]..table.backward_end[i])
        .step_by(d)
        .filter_map(move |q| {
            let tap = i.checked_sub(table.start[q])? / d;
            (tap < kernel_size).then_some((q, tap))
        })
}

impl ComputeDevice for CpuDevice {
    type Buffer<E: Element> = CpuBuffer<E>;

    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn location(&self) -> Location {
        Location::Host
    }

    fn supports(&self, _dtype: DType) -> bool {
        true
    }

    fn upload<E: Element>(&self, data: &[E]) -> Result<CpuBuffer<E>> {
        Ok(CpuBuffer::from_vec(data.to_vec()))
    }

    fn alloc_zeros<E: Element>(&self, len: usize) -> Result<CpuBuffer<E>> {
        Ok(CpuBuffer::from_vec(vec![E::default(); len]))
    }

    fn neighborhood_dot<E: Element>(
        &self,
        plan: &Plan,
        a: Operand<'_, CpuBuffer<E>>,
        b: Operand<'_, CpuBuffer<E>>,
        bias: Option<&CpuBuffer<E>>,
    ) -> Result<CpuBuffer<E>> {
        let grid = plan.grid();
        let table = plan.table();
        let taps = grid.kernel_volume();
        let rpb_volume = grid.rpb_volume();
        let (a_data, b_data) = (a.buffer.as_slice(), b.buffer.as_slice());
        let (a_cs, b_cs) = (a.channel_stride(), b.channel_stride());
        let bias = bias.map(CpuBuffer::as_slice);

        let mut out = vec![E::default(); plan.rows() * taps];
        self.install(|| {
            out.par_chunks_mut(taps)
                .enumerate()
                .for_each(|(row, dst)| {
                    let (n, h, pos) = plan.split_row(row);
                    let a_off = a.offset(n, h, pos);
                    let rpb_start = table.rpb_starts(pos);
                    for_each_tap(grid, table.starts(pos), |tap, [t0, t1, t2], key| {
                        let b_off = b.offset(n, h, key);
                        let mut acc = E::Acc::ZERO;
                        for c in 0..a.channels {
                            acc += a_data[a_off + c * a_cs].to_acc()
                                * b_data[b_off + c * b_cs].to_acc();
                        }
                        if let Some(bias) = bias {
                            let r = grid.rpb_index([
                                rpb_start[0] + t0,
                                rpb_start[1] + t1,
                                rpb_start[2] + t2,
                            ]);
                            acc += bias[h * rpb_volume + r].to_acc();
                        }
                        dst[tap] = E::from_acc(acc);
                    });
                });
        });
        Ok(CpuBuffer::from_vec(out))
    }

    fn neighborhood_gather<E: Element>(
        &self,
        plan: &Plan,
        weights: Operand<'_, CpuBuffer<E>>,
        values: Operand<'_, CpuBuffer<E>>,
    ) -> Result<CpuBuffer<E>> {
        let grid = plan.grid();
        let table = plan.table();
        let channels = values.channels;
        let (w_data, v_data) = (weights.buffer.as_slice(), values.buffer.as_slice());
        let (w_cs, v_cs) = (weights.channel_stride(), values.channel_stride());

        let mut out = vec![E::default(); plan.rows() * channels];
        if channels == 0 {
            return Ok(CpuBuffer::from_vec(out));
        }
        self.install(|| {
            out.par_chunks_mut(channels).enumerate().for_each_init(
                || vec![E::Acc::ZERO; channels],
                |acc, (row, dst)| {
                    acc.fill(E::Acc::ZERO);
                    let (n, h, pos) = plan.split_row(row);
                    let w_off = weights.offset(n, h, pos);
                    for_each_tap(grid, table.starts(pos), |tap, _, key| {
                        let w = w_data[w_off + tap * w_cs].to_acc();
                        let v_off = values.offset(n, h, key);
                        for (c, a) in acc.iter_mut().enumerate() {
                            *a += w * v_data[v_off + c * v_cs].to_acc();
                        }
                    });
                    for (d, a) in dst.iter_mut().zip(acc.iter()) {
                        *d = E::from_acc(*a);
                    }
                },
            );
        });
        Ok(CpuBuffer::from_vec(out))
    }

    fn inverse_neighborhood<E: Element>(
        &self,
        plan: &Plan,
        weights: Operand<'_, CpuBuffer<E>>,
        values: Operand<'_, CpuBuffer<E>>,
    ) -> Result<CpuBuffer<E>> {
        let grid = plan.grid();
        let table = plan.table();
        let [k0, k1, k2] = grid.kernel_sizes();
        let channels = values.channels;
        let (w_data, v_data) = (weights.buffer.as_slice(), values.buffer.as_slice());
        let (w_cs, v_cs) = (weights.channel_stride(), values.channel_stride());

        let mut out = vec![E::default(); plan.rows() * channels];
        if channels == 0 {
            return Ok(CpuBuffer::from_vec(out));
        }
        self.install(|| {
            out.par_chunks_mut(channels).enumerate().for_each_init(
                || vec![E::Acc::ZERO; channels],
                |acc, (row, dst)| {
                    acc.fill(E::Acc::ZERO);
                    let (n, h, [i0, i1, i2]) = plan.split_row(row);
                    for (q0, t0) in producers(&table.axes[0], k0, i0) {
                        for (q1, t1) in producers(&table.axes[1], k1, i1) {
                            for (q2, t2) in producers(&table.axes[2], k2, i2) {
                                let q = [q0, q1, q2];
                                let tap = grid.tap_index([t0, t1, t2]);
                                let w = w_data[weights.offset(n, h, q) + tap * w_cs].to_acc();
                                let v_off = values.offset(n, h, q);
                                for (c, a) in acc.iter_mut().enumerate() {
                                    *a += w * v_data[v_off + c * v_cs].to_acc();
                                }
                            }
                        }
                    }
                    for (d, a) in dst.iter_mut().zip(acc.iter()) {
                        *d = E::from_acc(*a);
                    }
                },
            );
        });
        Ok(CpuBuffer::from_vec(out))
    }

    fn rpb_grad<E: Element>(
        &self,
        plan: &Plan,
        d_logits: Operand<'_, CpuBuffer<E>>,
    ) -> Result<CpuBuffer<E>> {
        let grid = plan.grid();
        let table = plan.table();
        let rpb_volume = grid.rpb_volume();
        let [k0, k1, k2] = grid.kernel_sizes();
        let [e0, e1, e2] = grid.extents();
        let data = d_logits.buffer.as_slice();
        let cs = d_logits.channel_stride();
        let batch = plan.batch();

        // Tap along one axis that lands on bias offset `o` from position `p`.
        let tap_for = |axis: usize, o: usize, p: usize, k: usize| {
            o.checked_sub(table.axes[axis].rpb_start[p])
                .filter(|&t| t < k)
        };

        let mut out = vec![E::default(); plan.heads() * rpb_volume];
        self.install(|| {
            out.par_iter_mut().enumerate().for_each(|(idx, dst)| {
                let h = idx / rpb_volume;
                let [o0, o1, o2] = grid.split_rpb(idx % rpb_volume);
                let mut acc = E::Acc::ZERO;
                for p0 in 0..e0 {
                    let Some(t0) = tap_for(0, o0, p0, k0) else { continue };
                    for p1 in 0..e1 {
                        let Some(t1) = tap_for(1, o1, p1, k1) else { continue };
                        for p2 in 0..e2 {
                            let Some(t2) = tap_for(2, o2, p2, k2) else { continue };
                            let tap = grid.tap_index([t0, t1, t2]);
                            for n in 0..batch {
                                let off = d_logits.offset(n, h, [p0, p1, p2]) + tap * cs;
                                acc += data[off].to_acc();
                            }
                        }
                    }
                }
                *dst = E::from_acc(acc);
            });
        });
        Ok(CpuBuffer::from_vec(out))
    }

    fn synchronize(&self) -> Result<()> {
        Ok(())
    }
}

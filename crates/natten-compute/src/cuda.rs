//! CUDA compute backend via cudarc.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use cudarc::driver::{CudaDevice as CudaDeviceInner, CudaSlice, LaunchAsync, LaunchConfig};
use cudarc::nvrtc;
use natten_tensor::{DType, Element};
use tracing::{info, trace};

use crate::device::{ComputeBuffer, ComputeDevice, Location};
use crate::dispatch::{Backend, BackendKind};
use crate::error::{NattenError, Result};
use crate::kernels::neighborhood_cuda::{
    kernel_source, KERNEL_NAMES, PARAMS_LEN, P_A_CH, P_A_STRIDES, P_BATCH, P_B_CH, P_B_STRIDES,
    P_DILATION, P_EXTENT, P_HAS_BIAS, P_HEADS, P_KERNEL,
};
use crate::plan::{Operand, Plan, OPERAND_AXES};

const BLOCK_SIZE: u32 = 256;
const MAX_BLOCKS: u64 = 65_535;

/// CUDA buffer holding elements as raw bytes.
pub struct CudaBuffer<E> {
    data: CudaSlice<u8>,
    len: usize,
    ordinal: usize,
    _elem: PhantomData<E>,
}

impl<E: Element> ComputeBuffer for CudaBuffer<E> {
    type Elem = E;

    fn len(&self) -> usize {
        self.len
    }

    fn location(&self) -> Location {
        Location::Cuda(self.ordinal)
    }

    fn to_vec(&self) -> Result<Vec<E>> {
        let bytes = self.data.device().dtoh_sync_copy(&self.data)?;
        let mut out: Vec<E> = bytemuck::pod_collect_to_vec(&bytes);
        out.truncate(self.len);
        Ok(out)
    }
}

/// CUDA compute device.
pub struct CudaComputeDevice {
    device: Arc<CudaDeviceInner>,
    ordinal: usize,
    module_cache: Mutex<HashMap<u64, String>>, // source hash → module name
}

impl CudaComputeDevice {
    /// Acquire the device with the given ordinal.
    pub fn new(ordinal: usize) -> Result<Self> {
        let device = CudaDeviceInner::new(ordinal)?;
        info!(ordinal, "acquired cuda device");
        Ok(Self {
            device,
            ordinal,
            module_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Acquire the device named by `backend`, e.g. `"cuda:1"`.
    pub fn from_backend(backend: &Backend) -> Result<Self> {
        Self::new(backend.cuda_ordinal()?)
    }

    /// Compile and load the kernels for `dtype`, returning the module name.
    fn module_for(&self, dtype: DType) -> Result<String> {
        let source = kernel_source(dtype).ok_or(NattenError::UnsupportedDtype {
            backend: BackendKind::Cuda,
            dtype,
        })?;
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        let hash = hasher.finish();

        let mut cache = self
            .module_cache
            .lock()
            .map_err(|_| NattenError::Device("module cache lock poisoned".into()))?;
        if let Some(name) = cache.get(&hash) {
            trace!(%dtype, module = %name, "kernel module cache hit");
            return Ok(name.clone());
        }

        let module_name = format!("m{hash:x}");
        let ptx = nvrtc::compile_ptx(source)?;
        self.device.load_ptx(ptx, &module_name, &KERNEL_NAMES)?;
        info!(%dtype, module = %module_name, "compiled neighborhood kernels");
        cache.insert(hash, module_name.clone());
        Ok(module_name)
    }

    fn upload_u32(&self, data: &[u32]) -> Result<CudaSlice<u32>> {
        Ok(self.device.htod_sync_copy(data)?)
    }

    /// Launch `name` with one thread per output element.
    fn launch<E: Element>(
        &self,
        name: &'static str,
        plan: &Plan,
        a: Operand<'_, CudaBuffer<E>>,
        b: Option<Operand<'_, CudaBuffer<E>>>,
        bias: Option<&CudaBuffer<E>>,
        out_len: usize,
    ) -> Result<CudaBuffer<E>> {
        let out = self.alloc_zeros::<E>(out_len)?;
        if out_len == 0 {
            return Ok(out);
        }
        let module = self.module_for(E::DTYPE)?;
        let func = self
            .device
            .get_func(&module, name)
            .ok_or_else(|| NattenError::Device(format!("kernel `{name}` not found")))?;

        let table = plan
            .table()
            .packed_u32()
            .ok_or_else(|| NattenError::Device("grid exceeds 32-bit indexing".into()))?;
        let table = self.upload_u32(&table)?;
        let params = self.upload_u32(&params(plan, &a, b.as_ref(), bias.is_some())?)?;

        // Unused pointer slots still need a valid allocation.
        let placeholder;
        let b_data = match &b {
            Some(op) => &op.buffer.data,
            None => &a.buffer.data,
        };
        let rpb_data = match bias {
            Some(buf) => &buf.data,
            None => {
                placeholder = self.device.alloc_zeros::<u8>(E::DTYPE.size_in_bytes())?;
                &placeholder
            }
        };

        let total = out_len as u64;
        let blocks = total.div_ceil(u64::from(BLOCK_SIZE)).min(MAX_BLOCKS) as u32;
        let cfg = LaunchConfig {
            grid_dim: (blocks, 1, 1),
            block_dim: (BLOCK_SIZE, 1, 1),
            shared_mem_bytes: 0,
        };
        unsafe {
            func.launch(
                cfg,
                (
                    &a.buffer.data,
                    b_data,
                    rpb_data,
                    &out.data,
                    &table,
                    &params,
                    total,
                ),
            )
        }?;
        Ok(out)
    }
}

fn to_u32(v: usize) -> Result<u32> {
    u32::try_from(v).map_err(|_| NattenError::Device(format!("{v} exceeds 32-bit indexing")))
}

fn params<B>(
    plan: &Plan,
    a: &Operand<'_, B>,
    b: Option<&Operand<'_, B>>,
    has_bias: bool,
) -> Result<Vec<u32>> {
    let grid = plan.grid();
    let mut p = vec![0u32; PARAMS_LEN];
    p[P_BATCH] = to_u32(plan.batch())?;
    p[P_HEADS] = to_u32(plan.heads())?;
    for axis in 0..3 {
        p[P_EXTENT + axis] = to_u32(grid.extents()[axis])?;
        p[P_KERNEL + axis] = to_u32(grid.kernel_sizes()[axis])?;
        p[P_DILATION + axis] = to_u32(grid.dilations()[axis])?;
    }
    p[P_A_CH] = to_u32(a.channels)?;
    for (i, &s) in a.strides.iter().enumerate() {
        p[P_A_STRIDES + i] = to_u32(s)?;
    }
    if let Some(b) = b {
        p[P_B_CH] = to_u32(b.channels)?;
        for i in 0..OPERAND_AXES {
            p[P_B_STRIDES + i] = to_u32(b.strides[i])?;
        }
    }
    p[P_HAS_BIAS] = u32::from(has_bias);
    Ok(p)
}

impl ComputeDevice for CudaComputeDevice {
    type Buffer<E: Element> = CudaBuffer<E>;

    fn kind(&self) -> BackendKind {
        BackendKind::Cuda
    }

    fn location(&self) -> Location {
        Location::Cuda(self.ordinal)
    }

    fn supports(&self, dtype: DType) -> bool {
        kernel_source(dtype).is_some()
    }

    fn upload<E: Element>(&self, data: &[E]) -> Result<CudaBuffer<E>> {
        let slice = self.device.htod_sync_copy(bytemuck::cast_slice::<E, u8>(data))?;
        Ok(CudaBuffer {
            data: slice,
            len: data.len(),
            ordinal: self.ordinal,
            _elem: PhantomData,
        })
    }

    fn alloc_zeros<E: Element>(&self, len: usize) -> Result<CudaBuffer<E>> {
        // Zero-length device allocations are rejected by the driver.
        let bytes = (len * E::DTYPE.size_in_bytes()).max(1);
        let slice = self.device.alloc_zeros::<u8>(bytes)?;
        Ok(CudaBuffer {
            data: slice,
            len,
            ordinal: self.ordinal,
            _elem: PhantomData,
        })
    }

    fn neighborhood_dot<E: Element>(
        &self,
        plan: &Plan,
        a: Operand<'_, CudaBuffer<E>>,
        b: Operand<'_, CudaBuffer<E>>,
        bias: Option<&CudaBuffer<E>>,
    ) -> Result<CudaBuffer<E>> {
        let len = plan.rows() * plan.grid().kernel_volume();
        self.launch("nbhd_dot", plan, a, Some(b), bias, len)
    }

    fn neighborhood_gather<E: Element>(
        &self,
        plan: &Plan,
        weights: Operand<'_, CudaBuffer<E>>,
        values: Operand<'_, CudaBuffer<E>>,
    ) -> Result<CudaBuffer<E>> {
        let len = plan.rows() * values.channels;
        self.launch("nbhd_gather", plan, weights, Some(values), None, len)
    }

    fn inverse_neighborhood<E: Element>(
        &self,
        plan: &Plan,
        weights: Operand<'_, CudaBuffer<E>>,
        values: Operand<'_, CudaBuffer<E>>,
    ) -> Result<CudaBuffer<E>> {
        let len = plan.rows() * values.channels;
        self.launch("nbhd_inverse", plan, weights, Some(values), None, len)
    }

    fn rpb_grad<E: Element>(
        &self,
        plan: &Plan,
        d_logits: Operand<'_, CudaBuffer<E>>,
    ) -> Result<CudaBuffer<E>> {
        let len = plan.heads() * plan.grid().rpb_volume();
        self.launch("nbhd_rpb_grad", plan, d_logits, None, None, len)
    }

    fn synchronize(&self) -> Result<()> {
        Ok(self.device.synchronize()?)
    }
}

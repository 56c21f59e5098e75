//! Shared helpers for natten benchmarks: seeded RNG, input generators.

use natten_compute::{ComputeDevice, ComputeTensor, Element, Result, Shape, Tensor};

/// SplitMix64 generator for reproducible bench inputs.
pub struct Rng(u64);

impl Rng {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    /// Uniform in `[lo, hi)` from the top 53 bits.
    pub fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        self.0 = self.0.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^= z >> 31;
        lo + (hi - lo) * ((z >> 11) as f64 / (1u64 << 53) as f64)
    }
}

pub fn make_rng() -> Rng {
    Rng::new(0xDEAD_BEEF_CAFE_BABE)
}

/// One benchmark geometry: `[batch, heads, *spatial, dim]` inputs.
#[derive(Debug, Clone)]
pub struct Case<const R: usize> {
    pub batch: usize,
    pub heads: usize,
    pub spatial: [usize; R],
    pub dim: usize,
    pub kernel_size: usize,
    pub dilation: usize,
}

impl<const R: usize> Case<R> {
    pub fn dims(&self, channels: usize) -> Vec<usize> {
        let mut d = vec![self.batch, self.heads];
        d.extend_from_slice(&self.spatial);
        d.push(channels);
        d
    }

    pub fn kernel_volume(&self) -> usize {
        self.kernel_size.pow(R as u32)
    }

    /// Short label such as `56x56_k7_d2`.
    pub fn label(&self) -> String {
        let extents: Vec<String> = self.spatial.iter().map(|e| e.to_string()).collect();
        format!("{}_k{}_d{}", extents.join("x"), self.kernel_size, self.dilation)
    }
}

/// Host tensor of uniform values in [-1, 1).
pub fn random_tensor<E: Element>(rng: &mut Rng, dims: &[usize]) -> Tensor<E> {
    let mut t = Tensor::zeros(Shape::from_slice(dims));
    for x in t.data_mut() {
        *x = E::from_f64(rng.uniform(-1.0, 1.0));
    }
    t
}

/// Random tensor uploaded to `dev`.
pub fn random_on<D: ComputeDevice, E: Element>(
    dev: &D,
    rng: &mut Rng,
    dims: &[usize],
) -> Result<ComputeTensor<D::Buffer<E>>> {
    dev.upload_tensor(&random_tensor::<E>(rng, dims))
}

/// Install a `RUST_LOG`-filtered fmt subscriber, once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

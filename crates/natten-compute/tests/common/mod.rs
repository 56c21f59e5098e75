#![allow(dead_code)]

use natten_compute::{ComputeDevice, ComputeTensor, CpuBuffer, CpuDevice, Element, Tensor};

/// Small LCG so test inputs are reproducible without extra dependencies.
pub struct Rng {
    state: u64,
}

impl Rng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state
    }

    /// Uniform in [-1, 1).
    pub fn uniform(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
    }

    pub fn vec(&mut self, n: usize) -> Vec<f64> {
        (0..n).map(|_| self.uniform()).collect()
    }
}

/// `[batch, heads, *spatial, channels]`.
pub fn dims(batch: usize, heads: usize, spatial: &[usize], channels: usize) -> Vec<usize> {
    let mut d = vec![batch, heads];
    d.extend_from_slice(spatial);
    d.push(channels);
    d
}

pub fn upload<E: Element>(
    dev: &CpuDevice,
    data: &[f64],
    shape: &[usize],
) -> ComputeTensor<CpuBuffer<E>> {
    let data: Vec<E> = data.iter().map(|&v| E::from_f64(v)).collect();
    ComputeTensor::from_data(dev, &data, shape).unwrap()
}

pub fn download<E: Element>(t: &ComputeTensor<CpuBuffer<E>>) -> Vec<f64> {
    t.to_f64_vec().unwrap()
}

pub fn host<E: Element>(dev: &CpuDevice, t: &ComputeTensor<CpuBuffer<E>>) -> Tensor<E> {
    dev.download_tensor(t).unwrap()
}

pub fn inner(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Central finite differences of `f` at `x`.
pub fn numeric_grad(x: &[f64], f: impl Fn(&[f64]) -> f64) -> Vec<f64> {
    let eps = 1e-4;
    let mut x = x.to_vec();
    let mut grad = Vec::with_capacity(x.len());
    for i in 0..x.len() {
        let orig = x[i];
        x[i] = orig + eps;
        let plus = f(&x);
        x[i] = orig - eps;
        let minus = f(&x);
        x[i] = orig;
        grad.push((plus - minus) / (2.0 * eps));
    }
    grad
}

pub fn assert_close(name: &str, actual: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(actual.len(), expected.len(), "{name}: length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        let scale = 1.0f64.max(e.abs());
        assert!(
            (a - e).abs() <= tol * scale,
            "{name}[{i}]: got {a}, expected {e}"
        );
    }
}

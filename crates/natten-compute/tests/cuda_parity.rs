//! CUDA results agree with the CPU backend. Needs the `cuda` feature and a
//! device; skipped when no device can be acquired.

#![cfg(feature = "cuda")]

mod common;

use common::{assert_close, dims, Rng};
use natten_compute::{
    av_backward, av_forward, f16, inverse_neighborhood, qk_backward, qk_forward, Backend,
    ComputeDevice, ComputeTensor, CpuDevice, CudaComputeDevice, Element, NattenError,
    Neighborhood, Neighborhood1d, Neighborhood2d, Neighborhood3d, Shape, Tensor,
};

fn cuda() -> Option<CudaComputeDevice> {
    match CudaComputeDevice::from_backend(&Backend::Cuda { ordinal: 0 }) {
        Ok(dev) => Some(dev),
        Err(e) => {
            eprintln!("skipping: {e}");
            None
        }
    }
}

fn random<E: Element>(rng: &mut Rng, shape: &[usize]) -> Tensor<E> {
    let data = rng.vec(shape.iter().product()).into_iter().map(E::from_f64).collect();
    Tensor::new(data, Shape::from_slice(shape)).unwrap()
}

fn f64s<D: ComputeDevice, E: Element>(t: &ComputeTensor<D::Buffer<E>>) -> Vec<f64> {
    t.to_f64_vec().unwrap()
}

fn check_parity<E: Element, const R: usize>(
    gpu: &CudaComputeDevice,
    nbhd: Neighborhood<R>,
    spatial: [usize; R],
    tol: f64,
) {
    let cpu = CpuDevice::new();
    let mut rng = Rng::new(41);
    let x = dims(2, 3, &spatial, 16);
    let l = dims(2, 3, &spatial, nbhd.kernel_volume());
    let hosts = [
        random::<E>(&mut rng, &x),
        random::<E>(&mut rng, &x),
        random::<E>(&mut rng, &x),
        random::<E>(&mut rng, &l),
        random::<E>(&mut rng, &nbhd.rpb_shape(3)),
    ];

    macro_rules! run {
        ($dev:expr, $D:ty) => {{
            let dev = $dev;
            let [q, k, v, w, rpb] = hosts.clone().map(|t| dev.upload_tensor(&t).unwrap());
            let qk = qk_backward(dev, &w, &q, &k, true, &nbhd).unwrap();
            let av = av_backward(dev, &v, &w, &v, &nbhd).unwrap();
            vec![
                f64s::<$D, E>(&qk_forward(dev, &q, &k, Some(&rpb), &nbhd).unwrap()),
                f64s::<$D, E>(&av_forward(dev, &w, &v, &nbhd).unwrap()),
                f64s::<$D, E>(&inverse_neighborhood(dev, &w, &v, &nbhd).unwrap()),
                f64s::<$D, E>(&qk.d_query),
                f64s::<$D, E>(&qk.d_key),
                f64s::<$D, E>(&qk.d_rpb.unwrap()),
                f64s::<$D, E>(&av.d_weights),
                f64s::<$D, E>(&av.d_value),
            ]
        }};
    }

    let expected = run!(&cpu, CpuDevice);
    let actual = run!(gpu, CudaComputeDevice);
    let names = [
        "logits", "output", "inverse", "d_query", "d_key", "d_rpb", "d_weights", "d_value",
    ];
    for ((name, a), e) in names.iter().zip(&actual).zip(&expected) {
        let scale = e.iter().fold(1.0f64, |m, x| m.max(x.abs()));
        assert_close(name, a, e, tol * scale);
    }
}

#[test]
fn parity_f32() {
    let Some(gpu) = cuda() else { return };
    check_parity::<f32, 1>(&gpu, Neighborhood1d::square(5, 3).unwrap(), [17], 1e-4);
    check_parity::<f32, 2>(&gpu, Neighborhood2d::new([3, 5], [2, 1]).unwrap(), [9, 11], 1e-4);
    check_parity::<f32, 3>(&gpu, Neighborhood3d::square(3, 1).unwrap(), [4, 5, 6], 1e-4);
}

#[test]
fn parity_f64() {
    let Some(gpu) = cuda() else { return };
    check_parity::<f64, 2>(&gpu, Neighborhood2d::square(3, 2).unwrap(), [8, 7], 1e-10);
}

#[test]
fn parity_f16() {
    let Some(gpu) = cuda() else { return };
    check_parity::<f16, 2>(&gpu, Neighborhood2d::square(3, 1).unwrap(), [6, 6], 1e-2);
}

#[test]
fn bf16_is_rejected() {
    let Some(gpu) = cuda() else { return };
    let host = Tensor::<natten_compute::bf16>::zeros(Shape::from_slice(&[1, 1, 4, 2]));
    let q = gpu.upload_tensor(&host).unwrap();
    let nbhd = Neighborhood1d::square(3, 1).unwrap();
    assert!(matches!(
        qk_forward(&gpu, &q, &q, None, &nbhd),
        Err(NattenError::UnsupportedDtype { .. })
    ));
}

#[test]
fn host_tensors_are_rejected_on_device() {
    let Some(gpu) = cuda() else { return };
    let cpu = CpuDevice::new();
    let host = Tensor::<f32>::zeros(Shape::from_slice(&[1, 1, 4, 2]));
    let on_gpu = gpu.upload_tensor(&host).unwrap();
    let on_cpu = cpu.upload_tensor(&host).unwrap();
    assert_eq!(on_cpu.location(), natten_compute::Location::Host);
    assert_eq!(on_gpu.location(), natten_compute::Location::Cuda(0));
    // a plan for the device refuses a tensor it cannot read
    let nbhd = Neighborhood1d::square(3, 1).unwrap();
    let plan = natten_compute::Plan::new(&gpu, &nbhd, &on_gpu, "query").unwrap();
    assert!(matches!(
        plan.check(&on_cpu, "key", None),
        Err(NattenError::LocationMismatch { name: "key", .. })
    ));
}

//! Reduced-precision storage tracks the f32 path.

mod common;

use common::{assert_close, dims, download, upload, Rng};
use natten_compute::{
    av_backward, av_forward, bf16, f16, qk_backward, qk_forward, CpuDevice, Element,
    Neighborhood2d,
};

struct Outputs {
    logits: Vec<f64>,
    output: Vec<f64>,
    d_query: Vec<f64>,
    d_key: Vec<f64>,
    d_rpb: Vec<f64>,
    d_weights: Vec<f64>,
    d_value: Vec<f64>,
}

fn run<E: Element>(seed: u64) -> Outputs {
    let dev = CpuDevice::new();
    let mut rng = Rng::new(seed);
    let nbhd = Neighborhood2d::new([3, 3], [1, 2]).unwrap();
    let spatial = [5, 7];
    let heads = 2;
    let x_shape = dims(2, heads, &spatial, 8);
    let l_shape = dims(2, heads, &spatial, 9);
    let rpb_shape = nbhd.rpb_shape(heads);
    let n_x: usize = x_shape.iter().product();
    let n_l: usize = l_shape.iter().product();

    let q = upload::<E>(&dev, &rng.vec(n_x), &x_shape);
    let k = upload::<E>(&dev, &rng.vec(n_x), &x_shape);
    let v = upload::<E>(&dev, &rng.vec(n_x), &x_shape);
    let rpb = upload::<E>(&dev, &rng.vec(rpb_shape.iter().product()), &rpb_shape);
    // normalized-looking weights
    let w_data: Vec<f64> = rng.vec(n_l).iter().map(|x| (x + 1.0) / 9.0).collect();
    let w = upload::<E>(&dev, &w_data, &l_shape);
    let d_logits = upload::<E>(&dev, &rng.vec(n_l), &l_shape);
    let d_out = upload::<E>(&dev, &rng.vec(n_x), &x_shape);

    let logits = qk_forward(&dev, &q, &k, Some(&rpb), &nbhd).unwrap();
    let output = av_forward(&dev, &w, &v, &nbhd).unwrap();
    let qk = qk_backward(&dev, &d_logits, &q, &k, true, &nbhd).unwrap();
    let av = av_backward(&dev, &d_out, &w, &v, &nbhd).unwrap();
    Outputs {
        logits: download(&logits),
        output: download(&output),
        d_query: download(&qk.d_query),
        d_key: download(&qk.d_key),
        d_rpb: download(&qk.d_rpb.unwrap()),
        d_weights: download(&av.d_weights),
        d_value: download(&av.d_value),
    }
}

fn compare(reduced: &Outputs, reference: &Outputs, tol: f64) {
    assert_close("logits", &reduced.logits, &reference.logits, tol);
    assert_close("output", &reduced.output, &reference.output, tol);
    assert_close("d_query", &reduced.d_query, &reference.d_query, tol);
    assert_close("d_key", &reduced.d_key, &reference.d_key, tol);
    assert_close("d_weights", &reduced.d_weights, &reference.d_weights, tol);
    assert_close("d_value", &reduced.d_value, &reference.d_value, tol);
    // bias gradient sums every position, so compare relative to its size
    let scale = reference.d_rpb.iter().fold(1.0f64, |m, x| m.max(x.abs()));
    assert_close("d_rpb", &reduced.d_rpb, &reference.d_rpb, tol * scale);
}

#[test]
fn f16_matches_f32() {
    compare(&run::<f16>(31), &run::<f32>(31), 1e-2);
}

#[test]
fn bf16_matches_f32() {
    compare(&run::<bf16>(32), &run::<f32>(32), 1.5e-1);
}

#[test]
fn f64_matches_f32() {
    compare(&run::<f32>(33), &run::<f64>(33), 1e-5);
}

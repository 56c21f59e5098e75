//! Finite-difference checks of every backward pass, in f64 on the CPU.

mod common;

use common::{assert_close, dims, download, inner, numeric_grad, upload, Rng};
use natten_compute::{
    av_backward, av_forward, qk_backward, qk_forward, CpuDevice, Neighborhood, Neighborhood1d,
    Neighborhood2d, Neighborhood3d,
};

const TOL: f64 = 1e-6;

fn check_qk<const R: usize>(nbhd: Neighborhood<R>, spatial: [usize; R], seed: u64) {
    let dev = CpuDevice::new();
    let mut rng = Rng::new(seed);
    let (batch, heads, dim) = (2, 2, 3);
    let qk_shape = dims(batch, heads, &spatial, dim);
    let logit_shape = dims(batch, heads, &spatial, nbhd.kernel_volume());
    let rpb_shape = nbhd.rpb_shape(heads);

    let q = rng.vec(qk_shape.iter().product());
    let k = rng.vec(qk_shape.iter().product());
    let rpb = rng.vec(rpb_shape.iter().product());
    let g = rng.vec(logit_shape.iter().product());

    // loss = <qk_forward(q, k, rpb), g>
    let loss = |q: &[f64], k: &[f64], rpb: &[f64]| {
        let q = upload::<f64>(&dev, q, &qk_shape);
        let k = upload::<f64>(&dev, k, &qk_shape);
        let rpb = upload::<f64>(&dev, rpb, &rpb_shape);
        let logits = qk_forward(&dev, &q, &k, Some(&rpb), &nbhd).unwrap();
        inner(&download(&logits), &g)
    };

    let grads = qk_backward(
        &dev,
        &upload::<f64>(&dev, &g, &logit_shape),
        &upload::<f64>(&dev, &q, &qk_shape),
        &upload::<f64>(&dev, &k, &qk_shape),
        true,
        &nbhd,
    )
    .unwrap();
    let d_rpb = grads.d_rpb.expect("bias gradient requested");
    assert_eq!(d_rpb.shape().dims(), rpb_shape.as_slice());

    assert_close(
        "d_query",
        &download(&grads.d_query),
        &numeric_grad(&q, |x| loss(x, &k, &rpb)),
        TOL,
    );
    assert_close(
        "d_key",
        &download(&grads.d_key),
        &numeric_grad(&k, |x| loss(&q, x, &rpb)),
        TOL,
    );
    assert_close(
        "d_rpb",
        &download(&d_rpb),
        &numeric_grad(&rpb, |x| loss(&q, &k, x)),
        TOL,
    );
}

fn check_av<const R: usize>(nbhd: Neighborhood<R>, spatial: [usize; R], seed: u64) {
    let dev = CpuDevice::new();
    let mut rng = Rng::new(seed);
    let (batch, heads, dim) = (2, 2, 4);
    let v_shape = dims(batch, heads, &spatial, dim);
    let w_shape = dims(batch, heads, &spatial, nbhd.kernel_volume());

    let w = rng.vec(w_shape.iter().product());
    let v = rng.vec(v_shape.iter().product());
    let g = rng.vec(v_shape.iter().product());

    let loss = |w: &[f64], v: &[f64]| {
        let w = upload::<f64>(&dev, w, &w_shape);
        let v = upload::<f64>(&dev, v, &v_shape);
        inner(&download(&av_forward(&dev, &w, &v, &nbhd).unwrap()), &g)
    };

    let grads = av_backward(
        &dev,
        &upload::<f64>(&dev, &g, &v_shape),
        &upload::<f64>(&dev, &w, &w_shape),
        &upload::<f64>(&dev, &v, &v_shape),
        &nbhd,
    )
    .unwrap();

    assert_close(
        "d_weights",
        &download(&grads.d_weights),
        &numeric_grad(&w, |x| loss(x, &v)),
        TOL,
    );
    assert_close(
        "d_value",
        &download(&grads.d_value),
        &numeric_grad(&v, |x| loss(&w, x)),
        TOL,
    );
}

#[test]
fn qk_gradients_1d() {
    check_qk(Neighborhood1d::square(3, 1).unwrap(), [6], 1);
}

#[test]
fn qk_gradients_1d_dilated_uneven() {
    // extent 7 is not a multiple of kernel * dilation
    check_qk(Neighborhood1d::square(3, 2).unwrap(), [7], 2);
}

#[test]
fn qk_gradients_2d() {
    check_qk(Neighborhood2d::new([3, 5], [2, 1]).unwrap(), [6, 5], 3);
}

#[test]
fn qk_gradients_3d() {
    check_qk(Neighborhood3d::new([3, 1, 3], [1, 1, 1]).unwrap(), [3, 2, 4], 4);
}

#[test]
fn av_gradients_1d() {
    check_av(Neighborhood1d::square(5, 1).unwrap(), [9], 5);
}

#[test]
fn av_gradients_2d_dilated() {
    check_av(Neighborhood2d::square(3, 2).unwrap(), [7, 6], 6);
}

#[test]
fn av_gradients_3d() {
    check_av(Neighborhood3d::new([3, 3, 1], [1, 1, 1]).unwrap(), [4, 3, 2], 7);
}

#[test]
fn qk_backward_without_bias() {
    let dev = CpuDevice::new();
    let nbhd = Neighborhood1d::square(3, 1).unwrap();
    let shape = dims(1, 1, &[5], 2);
    let q = upload::<f64>(&dev, &[1.0; 10], &shape);
    let d = upload::<f64>(&dev, &[1.0; 15], &dims(1, 1, &[5], 3));
    let grads = qk_backward(&dev, &d, &q, &q, false, &nbhd).unwrap();
    assert!(grads.d_rpb.is_none());
    assert_eq!(grads.d_query.shape().dims(), shape.as_slice());
}

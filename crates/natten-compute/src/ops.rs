//! Neighborhood attention operations.
//!
//! Each operation validates all of its inputs into a [`Plan`] before the
//! first kernel launches, then composes the four device primitives:
//!
//! | operation              | primitives                                   |
//! |------------------------|----------------------------------------------|
//! | `qk_forward`           | dot(query, key, rpb)                         |
//! | `qk_backward`          | gather(d_logits, key), inverse(d_logits, query), rpb_grad |
//! | `av_forward`           | gather(weights, value)                       |
//! | `av_backward`          | dot(d_output, value), inverse(weights, d_output) |
//! | `inverse_neighborhood` | inverse(weights, values)                     |

use natten_tensor::Shape;
use tracing::debug;

use crate::config::Neighborhood;
use crate::device::{ComputeBuffer, ComputeDevice};
use crate::error::Result;
use crate::plan::Plan;
use crate::tensor::ComputeTensor;

/// Gradients of [`qk_backward`].
pub struct QkGrads<B: ComputeBuffer> {
    pub d_query: ComputeTensor<B>,
    pub d_key: ComputeTensor<B>,
    /// Present when the forward pass used a bias.
    pub d_rpb: Option<ComputeTensor<B>>,
}

/// Gradients of [`av_backward`].
pub struct AvGrads<B: ComputeBuffer> {
    pub d_weights: ComputeTensor<B>,
    pub d_value: ComputeTensor<B>,
}

fn log_dispatch<const R: usize>(op: &'static str, plan: &Plan, nbhd: &Neighborhood<R>) {
    debug!(
        op,
        strategy = %plan.strategy(),
        batch = plan.batch(),
        heads = plan.heads(),
        spatial = ?plan.spatial(),
        kernel_size = ?nbhd.kernel_size(),
        dilation = ?nbhd.dilation(),
        "dispatch"
    );
}

/// Attention logits `[batch, heads, *spatial, kernel_volume]`.
///
/// `query` and `key` are `[batch, heads, *spatial, dim]`; `rpb`, when
/// given, is `[heads, *(2 * kernel_size - 1)]`.
pub fn qk_forward<D, B, const R: usize>(
    dev: &D,
    query: &ComputeTensor<B>,
    key: &ComputeTensor<B>,
    rpb: Option<&ComputeTensor<B>>,
    nbhd: &Neighborhood<R>,
) -> Result<ComputeTensor<B>>
where
    D: ComputeDevice<Buffer<B::Elem> = B>,
    B: ComputeBuffer,
{
    let plan = Plan::new(dev, nbhd, query, "query")?;
    let dim = plan.check(query, "query", None)?;
    plan.check(key, "key", Some(dim))?;
    if let Some(rpb) = rpb {
        plan.check_bias(rpb)?;
    }
    log_dispatch("qk_forward", &plan, nbhd);

    let logits = dev.neighborhood_dot::<B::Elem>(
        &plan,
        plan.operand(query),
        plan.operand(key),
        rpb.map(|t| &t.buffer),
    )?;
    ComputeTensor::from_buffer(logits, Shape::new(plan.dims(plan.grid().kernel_volume())))
}

/// Gradients of [`qk_forward`] given `d_logits`.
///
/// `d_rpb` is computed only when `bias_enabled`.
pub fn qk_backward<D, B, const R: usize>(
    dev: &D,
    d_logits: &ComputeTensor<B>,
    query: &ComputeTensor<B>,
    key: &ComputeTensor<B>,
    bias_enabled: bool,
    nbhd: &Neighborhood<R>,
) -> Result<QkGrads<B>>
where
    D: ComputeDevice<Buffer<B::Elem> = B>,
    B: ComputeBuffer,
{
    let plan = Plan::new(dev, nbhd, query, "query")?;
    let dim = plan.check(query, "query", None)?;
    plan.check(key, "key", Some(dim))?;
    plan.check(d_logits, "d_logits", Some(plan.grid().kernel_volume()))?;
    log_dispatch("qk_backward", &plan, nbhd);

    let d_logits_op = plan.operand(d_logits);
    let d_query = dev.neighborhood_gather::<B::Elem>(&plan, d_logits_op, plan.operand(key))?;
    let d_key =
        dev.inverse_neighborhood::<B::Elem>(&plan, d_logits_op, plan.operand(query))?;
    let d_rpb = if bias_enabled {
        let grad = dev.rpb_grad::<B::Elem>(&plan, d_logits_op)?;
        Some(ComputeTensor::from_buffer(grad, Shape::new(plan.rpb_dims()))?)
    } else {
        None
    };
    Ok(QkGrads {
        d_query: ComputeTensor::from_buffer(d_query, Shape::new(plan.dims(dim)))?,
        d_key: ComputeTensor::from_buffer(d_key, Shape::new(plan.dims(dim)))?,
        d_rpb,
    })
}

/// Weighted sum of each window's values, `[batch, heads, *spatial, dim]`.
///
/// `weights` are normalized by the caller.
pub fn av_forward<D, B, const R: usize>(
    dev: &D,
    weights: &ComputeTensor<B>,
    value: &ComputeTensor<B>,
    nbhd: &Neighborhood<R>,
) -> Result<ComputeTensor<B>>
where
    D: ComputeDevice<Buffer<B::Elem> = B>,
    B: ComputeBuffer,
{
    let plan = Plan::new(dev, nbhd, value, "value")?;
    let dim = plan.check(value, "value", None)?;
    plan.check(weights, "weights", Some(plan.grid().kernel_volume()))?;
    log_dispatch("av_forward", &plan, nbhd);

    let out =
        dev.neighborhood_gather::<B::Elem>(&plan, plan.operand(weights), plan.operand(value))?;
    ComputeTensor::from_buffer(out, Shape::new(plan.dims(dim)))
}

/// Gradients of [`av_forward`] given `d_output`.
pub fn av_backward<D, B, const R: usize>(
    dev: &D,
    d_output: &ComputeTensor<B>,
    weights: &ComputeTensor<B>,
    value: &ComputeTensor<B>,
    nbhd: &Neighborhood<R>,
) -> Result<AvGrads<B>>
where
    D: ComputeDevice<Buffer<B::Elem> = B>,
    B: ComputeBuffer,
{
    let plan = Plan::new(dev, nbhd, value, "value")?;
    let dim = plan.check(value, "value", None)?;
    plan.check(d_output, "d_output", Some(dim))?;
    let taps = plan.grid().kernel_volume();
    plan.check(weights, "weights", Some(taps))?;
    log_dispatch("av_backward", &plan, nbhd);

    let d_output_op = plan.operand(d_output);
    let d_weights =
        dev.neighborhood_dot::<B::Elem>(&plan, d_output_op, plan.operand(value), None)?;
    let d_value =
        dev.inverse_neighborhood::<B::Elem>(&plan, plan.operand(weights), d_output_op)?;
    Ok(AvGrads {
        d_weights: ComputeTensor::from_buffer(d_weights, Shape::new(plan.dims(taps)))?,
        d_value: ComputeTensor::from_buffer(d_value, Shape::new(plan.dims(dim)))?,
    })
}

/// `out[i] = sum over q with i in window(q) of weights[q][tap_of(q, i)] * values[q]`.
///
/// The scatter-reduction behind `d_key` and `d_value`, computed in gather
/// form.
pub fn inverse_neighborhood<D, B, const R: usize>(
    dev: &D,
    weights: &ComputeTensor<B>,
    values: &ComputeTensor<B>,
    nbhd: &Neighborhood<R>,
) -> Result<ComputeTensor<B>>
where
    D: ComputeDevice<Buffer<B::Elem> = B>,
    B: ComputeBuffer,
{
    let plan = Plan::new(dev, nbhd, values, "values")?;
    let channels = plan.check(values, "values", None)?;
    plan.check(weights, "weights", Some(plan.grid().kernel_volume()))?;
    log_dispatch("inverse_neighborhood", &plan, nbhd);

    let out = dev.inverse_neighborhood::<B::Elem>(
        &plan,
        plan.operand(weights),
        plan.operand(values),
    )?;
    ComputeTensor::from_buffer(out, Shape::new(plan.dims(channels)))
}

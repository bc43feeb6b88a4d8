//! Normalisation and aggregation steps shared by the scorers.
//!
//! Scores are normalised along the last (key) axis. The softmax shifts each
//! row by its maximum before exponentiating; rows where every key is masked
//! produce all-zero weights rather than NaN.

use candle_core::{DType, Tensor, D};
use candle_nn::ops::{dropout, sigmoid};
use layers::Linear;

use crate::core::validate::expect_same_device;
use crate::core::{AttentionError, ComputePrecision, Config, Result};
use crate::masks::MASK_DTYPE;

/// Softmax along the key axis with max subtraction.
pub fn stable_softmax(scores: &Tensor) -> Result<Tensor> {
    let max = scores.max_keepdim(D::Minus1)?;
    let neg_inf = Tensor::full(f32::NEG_INFINITY, max.shape(), max.device())?.to_dtype(max.dtype())?;
    // Fully masked rows have max = -inf; shift them by zero instead.
    let max = max.eq(&neg_inf)?.where_cond(&max.zeros_like()?, &max)?;
    let exp = scores.broadcast_sub(&max)?.exp()?;
    let sum = exp.sum_keepdim(D::Minus1)?;
    Ok(exp.broadcast_div(&guard_denominator(&sum)?)?)
}

/// Sigmoid of each score divided by the row total.
pub fn smoothed_normalize(scores: &Tensor) -> Result<Tensor> {
    let gated = sigmoid(scores)?;
    let sum = gated.sum_keepdim(D::Minus1)?;
    Ok(gated.broadcast_div(&guard_denominator(&sum)?)?)
}

fn guard_denominator(sum: &Tensor) -> Result<Tensor> {
    let empty = sum.eq(&sum.zeros_like()?)?;
    Ok(empty.where_cond(&sum.ones_like()?, sum)?)
}

/// Broadcasts an additive mask to `target` dims (`[b, q, k]` or `[b, h, q, k]`).
pub(crate) fn broadcast_mask(mask: &Tensor, target: &[usize]) -> Result<Tensor> {
    if mask.dtype() != MASK_DTYPE {
        return Err(AttentionError::UnsupportedDType {
            requested: format!("mask expects dtype {MASK_DTYPE:?}, got {:?}", mask.dtype()),
        });
    }
    let mismatch = || {
        AttentionError::shape(format!(
            "mask shape {:?} is incompatible with scores {target:?}",
            mask.dims()
        ))
    };
    match (target, mask.dims()) {
        (&[b, q, k], &[mb, mq, mk]) if (mb, mq, mk) == (b, q, k) => Ok(mask.clone()),
        (&[b, h, q, k], &[mb, mq, mk]) if (mb, mq, mk) == (b, q, k) => {
            Ok(mask.unsqueeze(1)?.broadcast_as((b, h, q, k))?)
        }
        (&[b, h, q, k], &[mb, mh, mq, mk])
            if (mb, mq, mk) == (b, q, k) && (mh == 1 || mh == h) =>
        {
            Ok(mask.broadcast_as((b, h, q, k))?)
        }
        _ => Err(mismatch()),
    }
}

/// Adds `mask` (if any) to `scores`.
pub fn apply_mask(scores: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
    let Some(mask) = mask else {
        return Ok(scores.clone());
    };
    expect_same_device("mask", scores, mask)?;
    let mask = broadcast_mask(mask, scores.dims())?.to_dtype(scores.dtype())?;
    Ok(scores.add(&mask)?)
}

/// Context = weights · values, with dropout on the weights when configured.
pub(crate) fn weighted_sum(weights: &Tensor, values: &Tensor, config: &Config) -> Result<Tensor> {
    let weights = match config.active_dropout() {
        Some(p) => dropout(weights, p)?,
        None => weights.clone(),
    };
    let values = values.to_dtype(weights.dtype())?.contiguous()?;
    Ok(weights.contiguous()?.matmul(&values)?)
}

/// Applies `proj` and returns the result in the dtype of `input`, so
/// half-precision parameters do not pull the working dtype down.
pub(crate) fn project(proj: &Linear, input: &Tensor) -> Result<Tensor> {
    Ok(proj.forward(input)?.to_dtype(input.dtype())?)
}

pub(crate) fn cast_to(precision: ComputePrecision, tensor: &Tensor) -> Result<Tensor> {
    match precision {
        ComputePrecision::ForceF32 if tensor.dtype() != DType::F32 => {
            Ok(tensor.to_dtype(DType::F32)?)
        }
        _ => Ok(tensor.clone()),
    }
}

pub(crate) fn cast_inputs(
    precision: ComputePrecision,
    query: &Tensor,
    keys: &Tensor,
    values: &Tensor,
) -> Result<(Tensor, Tensor, Tensor)> {
    Ok((
        cast_to(precision, query)?,
        cast_to(precision, keys)?,
        cast_to(precision, values)?,
    ))
}

/// `[b, len, heads * head_dim]` -> `[b, heads, len, head_dim]`.
pub(crate) fn split_heads(tensor: &Tensor, heads: usize, head_dim: usize) -> Result<Tensor> {
    let (batch, len, _) = tensor.dims3()?;
    Ok(tensor
        .reshape((batch, len, heads, head_dim))?
        .transpose(1, 2)?
        .contiguous()?)
}

/// `[b, heads, len, head_dim]` -> `[b, len, heads * head_dim]`.
pub(crate) fn merge_heads(tensor: &Tensor) -> Result<Tensor> {
    let (batch, heads, len, head_dim) = tensor.dims4()?;
    Ok(tensor
        .transpose(1, 2)?
        .contiguous()?
        .reshape((batch, len, heads * head_dim))?)
}

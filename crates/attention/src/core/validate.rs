//! Input validation shared by the scorers.

use candle_core::{DType, Tensor};

use super::errors::{AttentionError, Result};

/// Dimensions of a validated query/key pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueryKeyDims {
    pub batch: usize,
    pub q_len: usize,
    pub k_len: usize,
    pub q_dim: usize,
    pub k_dim: usize,
}

/// Dimensions of a validated query/key/value triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InputDims {
    pub qk: QueryKeyDims,
    pub v_dim: usize,
}

pub(crate) fn dims3(label: &str, tensor: &Tensor) -> Result<(usize, usize, usize)> {
    tensor.dims3().map_err(|_| {
        AttentionError::shape(format!(
            "{label} must have shape [batch, seq_len, features], got {:?}",
            tensor.dims()
        ))
    })
}

pub(crate) fn expect_float(label: &str, tensor: &Tensor) -> Result<()> {
    match tensor.dtype() {
        DType::F16 | DType::BF16 | DType::F32 | DType::F64 => Ok(()),
        other => Err(AttentionError::UnsupportedDType {
            requested: format!("{label} has dtype {other:?}"),
        }),
    }
}

pub(crate) fn expect_same_device(label: &str, reference: &Tensor, other: &Tensor) -> Result<()> {
    if reference.device().same_device(other.device()) {
        Ok(())
    } else {
        Err(AttentionError::shape(format!(
            "{label} must reside on the same device as the query"
        )))
    }
}

pub(crate) fn expect_feature_dim(label: &str, actual: usize, expected: usize) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(AttentionError::shape(format!(
            "{label} feature dimension {actual} does not match expected {expected}"
        )))
    }
}

pub(crate) fn check_query_keys(query: &Tensor, keys: &Tensor) -> Result<QueryKeyDims> {
    expect_float("query", query)?;
    expect_same_device("keys", query, keys)?;
    if query.dtype() != keys.dtype() {
        return Err(AttentionError::shape(format!(
            "query and keys must share a dtype, got {:?} and {:?}",
            query.dtype(),
            keys.dtype()
        )));
    }

    let (batch, q_len, q_dim) = dims3("query", query)?;
    let (kb, k_len, k_dim) = dims3("keys", keys)?;
    if kb != batch {
        return Err(AttentionError::shape(format!(
            "keys batch {kb} does not match query batch {batch}"
        )));
    }
    if q_len == 0 {
        return Err(AttentionError::shape("query must contain at least one position"));
    }
    if k_len == 0 {
        return Err(AttentionError::shape("keys must contain at least one position"));
    }
    Ok(QueryKeyDims {
        batch,
        q_len,
        k_len,
        q_dim,
        k_dim,
    })
}

pub(crate) fn check_inputs(query: &Tensor, keys: &Tensor, values: &Tensor) -> Result<InputDims> {
    let qk = check_query_keys(query, keys)?;
    expect_same_device("values", query, values)?;
    if values.dtype() != query.dtype() {
        return Err(AttentionError::shape(format!(
            "query and values must share a dtype, got {:?} and {:?}",
            query.dtype(),
            values.dtype()
        )));
    }
    let (vb, v_len, v_dim) = dims3("values", values)?;
    if vb != qk.batch || v_len != qk.k_len {
        return Err(AttentionError::shape(format!(
            "values shape mismatch: expected [{}, {}, _] got [{vb}, {v_len}, {v_dim}]",
            qk.batch, qk.k_len
        )));
    }
    Ok(InputDims { qk, v_dim })
}

/// Validates an optional previous alignment against `expected` dims, or
/// returns zeros of that shape.
pub(crate) fn previous_alignment(
    previous: Option<&Tensor>,
    expected: &[usize],
    like: &Tensor,
) -> Result<Tensor> {
    match previous {
        Some(previous) => {
            expect_same_device("previous alignment", like, previous)?;
            expect_float("previous alignment", previous)?;
            if previous.dims() != expected {
                return Err(AttentionError::shape(format!(
                    "previous alignment must have shape {expected:?}, got {:?}",
                    previous.dims()
                )));
            }
            Ok(previous.to_dtype(like.dtype())?)
        }
        None => Ok(Tensor::zeros(expected, like.dtype(), like.device())?),
    }
}

//! Labelled validation helpers shared by the layer constructors and forward
//! paths.
//!
//! Every helper takes a `label` naming the tensor being checked so error
//! messages point at the offending parameter (`"linear.weight"`,
//! `"conv1d.input"`, ...). Failures are reported as [`LayerError::Shape`].

use candle_core::{DType, Tensor};

use crate::{LayerError, Result};

/// Floating point dtypes accepted for parameters and activations.
pub const FLOAT_DTYPES: &[DType] = &[DType::F16, DType::BF16, DType::F32, DType::F64];

/// Ensures a tensor has exactly `rank` dimensions.
pub fn expect_rank(label: &str, tensor: &Tensor, rank: usize) -> Result<()> {
    if tensor.rank() == rank {
        Ok(())
    } else {
        Err(LayerError::Shape(format!(
            "{label}: expected rank {rank}, got shape {:?}",
            tensor.dims()
        )))
    }
}

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(label: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    if tensor.dims() == expected {
        Ok(())
    } else {
        Err(LayerError::Shape(format!(
            "{label}: expected shape {expected:?}, got {:?}",
            tensor.dims()
        )))
    }
}

/// Ensures the trailing (feature) dimension equals `expected`.
pub fn expect_last_dim(label: &str, tensor: &Tensor, expected: usize) -> Result<()> {
    match tensor.dims().last() {
        Some(&last) if last == expected => Ok(()),
        _ => Err(LayerError::Shape(format!(
            "{label}: expected trailing dimension {expected}, got shape {:?}",
            tensor.dims()
        ))),
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(label: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.contains(&dtype) {
        Ok(())
    } else {
        Err(LayerError::Shape(format!(
            "{label}: expected dtype in {allowed:?}, got {dtype:?}"
        )))
    }
}

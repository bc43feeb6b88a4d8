//! Additive masks for the scorers.
//!
//! Masks are `f32` tensors shaped `[batch, q_len, k_len]`. Entries are `0.0`
//! where attention is permitted and `f32::NEG_INFINITY` where the key must be
//! ignored. Masks compose by addition; multi-head scorers broadcast them over
//! the head axis.

pub mod causal;
pub mod padding;

use candle_core::DType;

/// Dtype shared by all additive masks.
pub const MASK_DTYPE: DType = DType::F32;

pub use causal::build_causal_mask;
pub use padding::{padding_mask_from_booleans, padding_mask_from_lengths};

#[cfg(test)]
mod tests;

//! Core traits and types shared across attention scorers.
//!
//! Inputs use the layout `[batch, seq_len, features]`. A scorer turns a query
//! and a key sequence into raw compatibility scores, normalises them into a
//! distribution over key positions, and returns the weighted sum of the values
//! alongside the weights.

pub mod config;
pub mod errors;
pub(crate) mod validate;

use std::sync::OnceLock;

use candle_core::{DType, Tensor};

pub use config::{ComputePrecision, Config};
pub use errors::{AttentionError, Result};

use crate::ops;

/// Result of an attention call.
#[derive(Debug, Clone)]
pub struct AttentionOutput {
    /// Weighted combination of the values, `[batch, q_len, features]`.
    pub context: Tensor,
    /// Attention distribution over key positions. `[batch, q_len, k_len]` for
    /// single-head scorers, `[batch, n_heads, q_len, k_len]` for multi-head ones.
    pub weights: Tensor,
}

impl AttentionOutput {
    pub fn new(context: Tensor, weights: Tensor) -> Self {
        Self { context, weights }
    }

    pub fn into_parts(self) -> (Tensor, Tensor) {
        (self.context, self.weights)
    }

    /// Weights of the final query position with the query axis removed
    /// (`[batch, k_len]` or `[batch, n_heads, k_len]`), i.e. the alignment to
    /// feed into the next location-aware decoding step.
    pub fn last_alignment(&self) -> Result<Tensor> {
        let rank = self.weights.rank();
        if rank < 3 {
            return Err(AttentionError::shape(format!(
                "weights must have a query axis, got shape {:?}",
                self.weights.dims()
            )));
        }
        let query_axis = rank - 2;
        let q_len = self.weights.dims()[query_axis];
        if q_len == 0 {
            return Err(AttentionError::shape("weights have an empty query axis"));
        }
        Ok(self
            .weights
            .narrow(query_axis, q_len - 1, 1)?
            .squeeze(query_axis)?)
    }

    pub(crate) fn cast(self, dtype: DType) -> Result<Self> {
        Ok(Self {
            context: self.context.to_dtype(dtype)?,
            weights: self.weights.to_dtype(dtype)?,
        })
    }
}

/// Unified interface for attention scorers.
///
/// * `query` is `[batch, q_len, d_q]`, `keys` is `[batch, k_len, d_k]` and
///   `values` is `[batch, k_len, d_v]`; all three share device and dtype.
/// * Masks are additive `f32` tensors shaped `[batch, q_len, k_len]`
///   (multi-head scorers also accept `[batch, 1 | n_heads, q_len, k_len]`).
/// * The returned tensors carry the dtype of `query`; the working dtype is
///   selected by [`Config::precision`].
pub trait AttentionScorer {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Raw compatibility score for every (query position, key position) pair.
    fn score(&self, query: &Tensor, keys: &Tensor) -> Result<Tensor>;

    /// Scores, normalises with a max-shifted softmax, and aggregates `values`.
    fn attend(
        &self,
        query: &Tensor,
        keys: &Tensor,
        values: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
    ) -> Result<AttentionOutput> {
        config.validate()?;
        log_first_call(self.name(), config);
        validate::check_inputs(query, keys, values)?;

        let (q, k, v) = ops::cast_inputs(config.precision, query, keys, values)?;
        let scores = self.score(&q, &k)?;
        let scores = ops::apply_mask(&scores, mask)?;
        let weights = ops::stable_softmax(&scores)?;
        let context = ops::weighted_sum(&weights, &v, config)?;
        AttentionOutput::new(context, weights).cast(query.dtype())
    }
}

static FIRST_ATTEND: OnceLock<()> = OnceLock::new();

pub(crate) fn log_first_call(scorer: &str, config: &Config) {
    if FIRST_ATTEND.set(()).is_ok() {
        log::info!(
            "attention init scorer={scorer} precision={:?} dropout_p={:?}",
            config.precision,
            config.dropout_p
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorers::DotProductAttention;
    use candle_core::Device;

    fn zeros(shape: &[usize]) -> Tensor {
        Tensor::zeros(shape, DType::F32, &Device::Cpu).unwrap()
    }

    #[test]
    fn last_alignment_takes_the_final_query_row() -> Result<()> {
        let weights = Tensor::from_vec(vec![1f32, 0.0, 0.25, 0.75], (1, 2, 2), &Device::Cpu)?;
        let out = AttentionOutput::new(zeros(&[1, 2, 3]), weights);
        assert_eq!(out.last_alignment()?.to_vec2::<f32>()?, vec![vec![0.25, 0.75]]);
        Ok(())
    }

    #[test]
    fn last_alignment_of_empty_query_axis_is_a_shape_error() {
        let out = AttentionOutput::new(zeros(&[1, 0, 4]), zeros(&[1, 0, 3]));
        let err = out.last_alignment().unwrap_err();
        assert!(matches!(err, AttentionError::ShapeMismatch { .. }));
    }

    #[test]
    fn attend_rejects_empty_query() {
        let err = DotProductAttention::new()
            .attend(
                &zeros(&[1, 0, 4]),
                &zeros(&[1, 3, 4]),
                &zeros(&[1, 3, 4]),
                None,
                &Config::default(),
            )
            .unwrap_err();
        assert!(matches!(err, AttentionError::ShapeMismatch { .. }));
    }
}

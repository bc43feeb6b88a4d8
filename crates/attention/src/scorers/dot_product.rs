//! Dot-product attention: `score(q, k) = q · k`.

use candle_core::Tensor;

use crate::core::validate::{check_query_keys, expect_feature_dim};
use crate::core::{AttentionScorer, Result};

/// Parameter-free dot-product attention.
#[derive(Debug, Clone, Copy, Default)]
pub struct DotProductAttention;

impl DotProductAttention {
    pub fn new() -> Self {
        Self
    }
}

/// `[b, q, d] x [b, k, d]ᵀ -> [b, q, k]`, after checking the feature widths agree.
pub(crate) fn dot_scores(query: &Tensor, keys: &Tensor) -> Result<Tensor> {
    let dims = check_query_keys(query, keys)?;
    expect_feature_dim("query", dims.q_dim, dims.k_dim)?;
    let keys_t = keys.t()?.contiguous()?;
    Ok(query.contiguous()?.matmul(&keys_t)?)
}

impl AttentionScorer for DotProductAttention {
    fn name(&self) -> &'static str {
        "dot_product"
    }

    fn score(&self, query: &Tensor, keys: &Tensor) -> Result<Tensor> {
        dot_scores(query, keys)
    }
}

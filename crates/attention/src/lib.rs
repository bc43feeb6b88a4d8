//! Attention scorers for sequence-to-sequence models on Candle.
//!
//! Every scorer maps a query `[batch, q_len, d_q]` and keys `[batch, k_len,
//! d_k]` to raw compatibility scores, normalises them into a distribution
//! over key positions with a max-shifted softmax, and returns the weighted
//! sum of the values `[batch, k_len, d_v]` together with the weights.
//!
//! Available scorers live in [`scorers`]: additive, dot-product,
//! location-aware, scaled dot-product, multi-head, Transformer-XL relative
//! multi-head and multi-head location-aware. The stateless ones implement
//! [`AttentionScorer`]; scorers that condition on the previous alignment or a
//! positional embedding add `attend_with_previous` or `attend_relative`.
//!
//! Dropout on the weights is controlled per call through [`Config`] and is
//! off by default. Additive masks are built with the helpers in [`masks`].

pub mod core;
pub mod masks;
pub mod ops;
pub mod scorers;

pub use crate::core::{
    AttentionError, AttentionOutput, AttentionScorer, ComputePrecision, Config, Result,
};
pub use scorers::{
    AdditiveAttention, AlignmentEnergy, DotProductAttention, LocationAwareAttention,
    LocationAwareConfig, MultiHeadAttention, MultiHeadConfig, MultiHeadLocationAwareAttention,
    MultiHeadLocationAwareConfig, RelativeMultiHeadAttention, RelativeMultiHeadConfig,
    RelativeMultiHeadParams, ScaledDotProductAttention,
};

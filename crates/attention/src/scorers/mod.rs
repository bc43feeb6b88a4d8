//! Attention scorer implementations.
//!
//! | scorer | score |
//! |---|---|
//! | [`AdditiveAttention`] | `v · tanh(W_q q + W_k k + b)` |
//! | [`DotProductAttention`] | `q · k` |
//! | [`LocationAwareAttention`] | `w · tanh(W q + V k + U conv(prev) + b)` |
//! | [`ScaledDotProductAttention`] | `q · k / sqrt(d_k)` |
//! | [`MultiHeadAttention`] | `concat(head_1..head_n) · W_o` |
//! | [`RelativeMultiHeadAttention`] | Transformer-XL relative positions |
//! | [`MultiHeadLocationAwareAttention`] | per-head location-aware energy |

pub mod additive;
pub mod dot_product;
pub mod energy;
pub mod location_aware;
pub mod multi_head;
pub mod multi_head_location;
pub mod relative_multi_head;
pub mod scaled_dot;

pub use additive::AdditiveAttention;
pub use dot_product::DotProductAttention;
pub use energy::AlignmentEnergy;
pub use location_aware::{LocationAwareAttention, LocationAwareConfig};
pub use multi_head::{MultiHeadAttention, MultiHeadConfig};
pub use multi_head_location::{MultiHeadLocationAwareAttention, MultiHeadLocationAwareConfig};
pub use relative_multi_head::{
    RelativeMultiHeadAttention, RelativeMultiHeadConfig, RelativeMultiHeadParams,
};
pub use scaled_dot::ScaledDotProductAttention;

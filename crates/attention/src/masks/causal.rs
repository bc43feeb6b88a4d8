//! Causal masks for decoder self-attention.

use candle_core::{Device, Tensor};

use crate::core::Result;

/// Construct a causal mask for the supplied sequence dimensions.
///
/// When `k_len > q_len`, queries are aligned with the most recent `q_len` keys
/// and can see the whole prefix before them.
pub fn build_causal_mask(
    device: &Device,
    batch: usize,
    q_len: usize,
    k_len: usize,
) -> Result<Tensor> {
    let offset = k_len.saturating_sub(q_len);
    let row: Vec<f32> = (0..q_len)
        .flat_map(|q| {
            (0..k_len).map(move |k| if k > q + offset { f32::NEG_INFINITY } else { 0.0 })
        })
        .collect();
    let data = row.repeat(batch);
    Ok(Tensor::from_vec(data, (batch, q_len, k_len), device)?)
}

//! Padding masks that drop padded key positions.

use candle_core::{Device, Tensor};

use crate::core::{AttentionError, Result};

/// Masks keys at or beyond each batch element's valid length. Lengths larger
/// than `k_len` are clamped.
pub fn padding_mask_from_lengths(
    device: &Device,
    key_lengths: &[usize],
    q_len: usize,
    k_len: usize,
) -> Result<Tensor> {
    let batch = key_lengths.len();
    let mut data = vec![0f32; batch * q_len * k_len];
    for (b, &valid) in key_lengths.iter().enumerate() {
        let valid = valid.min(k_len);
        for q in 0..q_len {
            let row_start = (b * q_len + q) * k_len;
            data[row_start + valid..row_start + k_len].fill(f32::NEG_INFINITY);
        }
    }
    Ok(Tensor::from_vec(data, (batch, q_len, k_len), device)?)
}

/// Masks keys flagged `true` in `padding` (one slice per batch element, all
/// of the same length).
pub fn padding_mask_from_booleans(
    device: &Device,
    padding: &[Vec<bool>],
    q_len: usize,
) -> Result<Tensor> {
    let k_len = padding.first().map(Vec::len).unwrap_or(0);
    if let Some(ragged) = padding.iter().position(|flags| flags.len() != k_len) {
        return Err(AttentionError::shape(format!(
            "padding flags must share k_len {k_len}, batch element {ragged} has {}",
            padding[ragged].len()
        )));
    }

    let data: Vec<f32> = padding
        .iter()
        .flat_map(|flags| {
            let row: Vec<f32> = flags
                .iter()
                .map(|&padded| if padded { f32::NEG_INFINITY } else { 0.0 })
                .collect();
            row.repeat(q_len)
        })
        .collect();
    Ok(Tensor::from_vec(data, (padding.len(), q_len, k_len), device)?)
}

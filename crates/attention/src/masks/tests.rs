use super::*;
use crate::core::AttentionError;
use candle_core::{Device, Result};

fn idx(b: usize, q: usize, k: usize, q_len: usize, k_len: usize) -> usize {
    (b * q_len + q) * k_len + k
}

#[test]
fn causal_mask_respects_offsets() -> Result<()> {
    let device = Device::Cpu;
    let (q_len, k_len) = (3, 5);

    let mask = build_causal_mask(&device, 2, q_len, k_len).unwrap();
    assert_eq!(mask.dims(), &[2, q_len, k_len]);
    let values = mask.flatten_all()?.to_vec1::<f32>()?;

    // Earliest query sees the prefix (offset = k_len - q_len).
    assert_eq!(values[idx(0, 0, 2, q_len, k_len)], 0.0);
    assert_eq!(values[idx(0, 0, 3, q_len, k_len)], f32::NEG_INFINITY);
    // Later queries gain access to more keys, in every batch element.
    assert_eq!(values[idx(1, 2, 4, q_len, k_len)], 0.0);
    assert_eq!(values[idx(1, 1, 4, q_len, k_len)], f32::NEG_INFINITY);
    Ok(())
}

#[test]
fn causal_mask_handles_single_token_cases() -> Result<()> {
    let device = Device::Cpu;

    let mask = build_causal_mask(&device, 1, 1, 1).unwrap();
    assert_eq!(mask.flatten_all()?.to_vec1::<f32>()?, vec![0.0]);

    let mask = build_causal_mask(&device, 1, 1, 4).unwrap();
    assert_eq!(mask.flatten_all()?.to_vec1::<f32>()?, vec![0.0; 4]);

    let mask = build_causal_mask(&device, 1, 4, 2).unwrap();
    let values = mask.flatten_all()?.to_vec1::<f32>()?;
    assert_eq!(values[idx(0, 0, 1, 4, 2)], f32::NEG_INFINITY);
    assert_eq!(values[idx(0, 3, 1, 4, 2)], 0.0);
    Ok(())
}

#[test]
fn padding_mask_from_lengths_masks_tail() -> Result<()> {
    let device = Device::Cpu;
    let lengths = [2, 7];
    let (q_len, k_len) = (3, 5);

    let mask = padding_mask_from_lengths(&device, &lengths, q_len, k_len).unwrap();
    assert_eq!(mask.dims(), &[2, q_len, k_len]);
    let values = mask.flatten_all()?.to_vec1::<f32>()?;

    assert_eq!(values[idx(0, 0, 2, q_len, k_len)], f32::NEG_INFINITY);
    assert_eq!(values[idx(0, 1, 1, q_len, k_len)], 0.0);
    // Length clamped to k_len, so nothing masked.
    assert_eq!(values[idx(1, 2, 4, q_len, k_len)], 0.0);
    Ok(())
}

#[test]
fn padding_mask_from_booleans_respects_flags() -> Result<()> {
    let device = Device::Cpu;
    let padding = vec![vec![false, true, false], vec![true, true, false]];
    let q_len = 2;

    let mask = padding_mask_from_booleans(&device, &padding, q_len).unwrap();
    assert_eq!(mask.dims(), &[2, q_len, 3]);
    let values = mask.flatten_all()?.to_vec1::<f32>()?;

    assert_eq!(values[idx(0, 1, 1, q_len, 3)], f32::NEG_INFINITY);
    assert_eq!(values[idx(0, 1, 0, q_len, 3)], 0.0);
    assert_eq!(values[idx(1, 0, 0, q_len, 3)], f32::NEG_INFINITY);
    assert_eq!(values[idx(1, 1, 1, q_len, 3)], f32::NEG_INFINITY);
    assert_eq!(values[idx(1, 0, 2, q_len, 3)], 0.0);
    Ok(())
}

#[test]
fn ragged_boolean_padding_is_a_shape_error() {
    let padding = vec![vec![false, true], vec![true]];
    let err = padding_mask_from_booleans(&Device::Cpu, &padding, 1).unwrap_err();
    assert!(matches!(err, AttentionError::ShapeMismatch { .. }));
}

#[test]
fn causal_and_padding_masks_compose() -> Result<()> {
    let device = Device::Cpu;
    let causal = build_causal_mask(&device, 1, 3, 5).unwrap();
    let padding = padding_mask_from_lengths(&device, &[3], 3, 5).unwrap();

    let values = causal.add(&padding)?.flatten_all()?.to_vec1::<f32>()?;
    // Padding masks the tail even where causality allows it.
    assert_eq!(values[idx(0, 2, 4, 3, 5)], f32::NEG_INFINITY);
    assert_eq!(values[idx(0, 1, 1, 3, 5)], 0.0);
    Ok(())
}

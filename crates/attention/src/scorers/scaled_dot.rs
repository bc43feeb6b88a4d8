//! Scaled dot-product attention from "Attention Is All You Need":
//! `score(q, k) = q · k / sqrt(d_k)`.

use candle_core::Tensor;

use super::dot_product::dot_scores;
use crate::core::{AttentionScorer, Result};

/// Dot-product attention scaled by the key width to keep the softmax out of
/// its saturated region for large `d_k`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScaledDotProductAttention;

impl ScaledDotProductAttention {
    pub fn new() -> Self {
        Self
    }
}

impl AttentionScorer for ScaledDotProductAttention {
    fn name(&self) -> &'static str {
        "scaled_dot_product"
    }

    fn score(&self, query: &Tensor, keys: &Tensor) -> Result<Tensor> {
        let d_k = keys.dims().last().copied().unwrap_or(1).max(1);
        let scores = dot_scores(query, keys)?;
        Ok(scores.affine(1.0 / (d_k as f64).sqrt(), 0.0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Config;
    use crate::masks::build_causal_mask;
    use crate::scorers::DotProductAttention;
    use candle_core::{DType, Device, Result as CandleResult};

    fn build_inputs(device: &Device) -> CandleResult<(Tensor, Tensor, Tensor)> {
        let data: Vec<f32> = (0..64).map(|i| ((i * 7) % 13) as f32 * 0.1 - 0.6).collect();
        let q = Tensor::from_vec(data[..32].to_vec(), (2, 4, 4), device)?;
        let k = Tensor::from_vec(data[32..].to_vec(), (2, 4, 4), device)?;
        let v = Tensor::from_vec(data[16..48].to_vec(), (2, 4, 4), device)?;
        Ok((q, k, v))
    }

    fn naive_attention(q: &Tensor, k: &Tensor, v: &Tensor, mask: &Tensor) -> CandleResult<Vec<f32>> {
        let (batch, q_len, d) = q.dims3()?;
        let k_len = k.dims()[1];
        let qv = q.flatten_all()?.to_vec1::<f32>()?;
        let kv = k.flatten_all()?.to_vec1::<f32>()?;
        let vv = v.flatten_all()?.to_vec1::<f32>()?;
        let mv = mask.flatten_all()?.to_vec1::<f32>()?;
        let scale = 1.0 / (d as f32).sqrt();
        let mut out = vec![0f32; batch * q_len * d];

        for b in 0..batch {
            for i in 0..q_len {
                let mut row: Vec<f32> = (0..k_len)
                    .map(|j| {
                        let dot: f32 = (0..d)
                            .map(|x| qv[(b * q_len + i) * d + x] * kv[(b * k_len + j) * d + x])
                            .sum();
                        dot * scale + mv[(b * q_len + i) * k_len + j]
                    })
                    .collect();
                let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                row.iter_mut().for_each(|s| *s = (*s - max).exp());
                let denom: f32 = row.iter().sum();
                for x in 0..d {
                    out[(b * q_len + i) * d + x] = (0..k_len)
                        .map(|j| row[j] / denom * vv[(b * k_len + j) * d + x])
                        .sum();
                }
            }
        }
        Ok(out)
    }

    #[test]
    fn scores_are_dot_products_over_sqrt_dk() -> CandleResult<()> {
        let device = Device::Cpu;
        let (q, k, _) = build_inputs(&device)?;
        let dot = DotProductAttention.score(&q, &k).unwrap();
        let scaled = ScaledDotProductAttention.score(&q, &k).unwrap();
        let diff = scaled
            .sub(&dot.affine(0.5, 0.0)?)?
            .abs()?
            .max_all()?
            .to_vec0::<f32>()?;
        assert!(diff < 1e-6);
        Ok(())
    }

    #[test]
    fn masked_attention_matches_naive() -> CandleResult<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let mask = build_causal_mask(&device, 2, 4, 4).unwrap();
        let out = ScaledDotProductAttention
            .attend(&q, &k, &v, Some(&mask), &Config::default())
            .unwrap();
        let expected = naive_attention(&q, &k, &v, &mask)?;
        let actual = out.context.flatten_all()?.to_vec1::<f32>()?;
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!((a - e).abs() < 1e-5, "{a} vs {e}");
        }

        // Future keys receive no weight.
        let weights = out.weights.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(weights[1], 0.0);
        assert_eq!(weights[3], 0.0);
        Ok(())
    }

    #[test]
    fn half_precision_inputs_round_trip_dtype() -> CandleResult<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let reference = ScaledDotProductAttention
            .attend(&q, &k, &v, None, &Config::default())
            .unwrap();
        for dtype in [DType::F16, DType::BF16] {
            let out = ScaledDotProductAttention
                .attend(
                    &q.to_dtype(dtype)?,
                    &k.to_dtype(dtype)?,
                    &v.to_dtype(dtype)?,
                    None,
                    &Config::default(),
                )
                .unwrap();
            assert_eq!(out.context.dtype(), dtype);
            let diff = out
                .context
                .to_dtype(DType::F32)?
                .sub(&reference.context)?
                .abs()?
                .max_all()?
                .to_vec0::<f32>()?;
            assert!(diff < 5e-2, "{dtype:?} diverged by {diff}");
        }
        Ok(())
    }

    #[test]
    fn huge_scores_stay_finite() -> CandleResult<()> {
        let device = Device::Cpu;
        let q = Tensor::full(10_000f32, (1, 4, 4), &device)?;
        let k = Tensor::full(-10_000f32, (1, 4, 4), &device)?;
        let v = Tensor::ones((1, 4, 4), DType::F32, &device)?;
        let out = ScaledDotProductAttention
            .attend(&q, &k, &v, None, &Config::default())
            .unwrap();
        let values = out.context.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|v| v.is_finite()));
        Ok(())
    }

    #[test]
    fn zero_dropout_is_a_noop() -> CandleResult<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let config = Config {
            dropout_p: Some(0.0),
            ..Config::default()
        };
        let a = ScaledDotProductAttention.attend(&q, &k, &v, None, &config).unwrap();
        let b = ScaledDotProductAttention
            .attend(&q, &k, &v, None, &Config::default())
            .unwrap();
        let diff = a.context.sub(&b.context)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff < 1e-6);
        Ok(())
    }

    #[test]
    fn dropout_changes_context_but_not_weights() -> CandleResult<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let config = Config {
            dropout_p: Some(0.5),
            ..Config::default()
        };
        let dropped = ScaledDotProductAttention.attend(&q, &k, &v, None, &config).unwrap();
        let plain = ScaledDotProductAttention
            .attend(&q, &k, &v, None, &Config::default())
            .unwrap();

        let sums = dropped.weights.sum(2)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-5));
        let weight_diff = dropped.weights.sub(&plain.weights)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(weight_diff < 1e-6);
        let context_diff = dropped.context.sub(&plain.context)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(context_diff > 0.0);
        Ok(())
    }
}

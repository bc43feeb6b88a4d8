//! Multi-head attention with relative positional encoding, from
//! "Transformer-XL: Attentive Language Models Beyond a Fixed-Length Context".
//!
//! Each head combines a content term and a position term:
//!
//! `score = ((q + u) · k + shift((q + v) · p)) / sqrt(d_model)`
//!
//! where `p` is the projected positional embedding and `u`, `v` are learned
//! per-head biases. The scorer needs the positional embedding on every call,
//! so it exposes [`RelativeMultiHeadAttention::attend_relative`] instead of
//! implementing [`AttentionScorer`](crate::AttentionScorer).

use candle_core::{DType, Device, Tensor};
use layers::{Linear, LinearConfig, LinearInit};
use serde::Deserialize;

use crate::core::validate::{check_inputs, check_query_keys, dims3, expect_feature_dim, expect_same_device};
use crate::core::{log_first_call, AttentionError, AttentionOutput, Config, Result};
use crate::ops;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelativeMultiHeadConfig {
    pub d_model: usize,
    pub num_heads: usize,
}

impl Default for RelativeMultiHeadConfig {
    fn default() -> Self {
        Self {
            d_model: 512,
            num_heads: 16,
        }
    }
}

impl RelativeMultiHeadConfig {
    pub fn new(d_model: usize, num_heads: usize) -> Self {
        Self { d_model, num_heads }
    }

    pub fn head_dim(&self) -> Result<usize> {
        if self.d_model == 0 || self.num_heads == 0 || self.d_model % self.num_heads != 0 {
            return Err(AttentionError::config(format!(
                "d_model {} must be a non-zero multiple of num_heads {}",
                self.d_model, self.num_heads
            )));
        }
        Ok(self.d_model / self.num_heads)
    }

    pub fn validate(&self) -> Result<()> {
        self.head_dim().map(|_| ())
    }
}

/// Learned parameters of [`RelativeMultiHeadAttention`]. Projections are
/// `d_model -> d_model`; `pos_proj` has no bias; `u_bias` and `v_bias` are
/// `[num_heads, head_dim]`.
#[derive(Debug, Clone)]
pub struct RelativeMultiHeadParams {
    pub query_proj: Linear,
    pub key_proj: Linear,
    pub value_proj: Linear,
    pub pos_proj: Linear,
    pub out_proj: Linear,
    pub u_bias: Tensor,
    pub v_bias: Tensor,
}

#[derive(Debug, Clone)]
pub struct RelativeMultiHeadAttention {
    config: RelativeMultiHeadConfig,
    head_dim: usize,
    params: RelativeMultiHeadParams,
}

impl RelativeMultiHeadAttention {
    pub const NAME: &'static str = "relative_multi_head";

    pub fn new(config: RelativeMultiHeadConfig, device: &Device, dtype: DType) -> Result<Self> {
        let head_dim = config.head_dim()?;
        let d_model = config.d_model;
        let proj = |cfg: LinearConfig| Linear::with_init(cfg, &LinearInit::XavierUniform, device, dtype);
        let head_bias = || LinearInit::XavierUniform.sample(&[config.num_heads, head_dim], device, dtype);
        let params = RelativeMultiHeadParams {
            query_proj: proj(LinearConfig::new(d_model, d_model))?,
            key_proj: proj(LinearConfig::new(d_model, d_model))?,
            value_proj: proj(LinearConfig::new(d_model, d_model))?,
            pos_proj: proj(LinearConfig::without_bias(d_model, d_model))?,
            out_proj: proj(LinearConfig::new(d_model, d_model))?,
            u_bias: head_bias()?,
            v_bias: head_bias()?,
        };
        log::debug!(
            "attention::relative_multi_head init d_model={d_model} heads={} dtype={dtype:?}",
            config.num_heads
        );
        Self::from_parts(config, params)
    }

    pub fn from_parts(config: RelativeMultiHeadConfig, params: RelativeMultiHeadParams) -> Result<Self> {
        let head_dim = config.head_dim()?;
        let d_model = config.d_model;
        let projections = [
            ("query", &params.query_proj),
            ("key", &params.key_proj),
            ("value", &params.value_proj),
            ("position", &params.pos_proj),
            ("output", &params.out_proj),
        ];
        for (label, proj) in projections {
            let cfg = proj.config();
            if cfg.input_dim != d_model || cfg.output_dim != d_model {
                return Err(AttentionError::config(format!(
                    "{label} projection must be {d_model} -> {d_model}, got {} -> {}",
                    cfg.input_dim, cfg.output_dim
                )));
            }
        }
        if params.pos_proj.bias().is_some() {
            return Err(AttentionError::config("position projection must not carry a bias"));
        }
        for (label, bias) in [("u_bias", &params.u_bias), ("v_bias", &params.v_bias)] {
            if bias.dims() != [config.num_heads, head_dim] {
                return Err(AttentionError::shape(format!(
                    "{label} must have shape [{}, {head_dim}], got {:?}",
                    config.num_heads,
                    bias.dims()
                )));
            }
        }
        Ok(Self {
            config,
            head_dim,
            params,
        })
    }

    pub fn config(&self) -> &RelativeMultiHeadConfig {
        &self.config
    }

    /// Scaled content plus shifted position scores, `[batch, heads, q_len, k_len]`.
    /// `pos_embedding` is `[batch, k_len, d_model]`.
    pub fn score_relative(&self, query: &Tensor, keys: &Tensor, pos_embedding: &Tensor) -> Result<Tensor> {
        let dims = check_query_keys(query, keys)?;
        let d_model = self.config.d_model;
        expect_feature_dim("query", dims.q_dim, d_model)?;
        expect_feature_dim("keys", dims.k_dim, d_model)?;
        expect_same_device("pos_embedding", query, pos_embedding)?;
        let (pb, p_len, p_dim) = dims3("pos_embedding", pos_embedding)?;
        if (pb, p_len) != (dims.batch, dims.k_len) {
            return Err(AttentionError::shape(format!(
                "pos_embedding must have shape [{}, {}, {d_model}], got {:?}",
                dims.batch,
                dims.k_len,
                pos_embedding.dims()
            )));
        }
        expect_feature_dim("pos_embedding", p_dim, d_model)?;

        let heads = self.config.num_heads;
        let params = &self.params;
        // [b, q, heads, head_dim] so the per-head biases broadcast directly.
        let q = ops::project(&params.query_proj, query)?
            .reshape((dims.batch, dims.q_len, heads, self.head_dim))?;
        let k = ops::split_heads(&ops::project(&params.key_proj, keys)?, heads, self.head_dim)?;
        let p = ops::split_heads(
            &ops::project(&params.pos_proj, &pos_embedding.to_dtype(query.dtype())?)?,
            heads,
            self.head_dim,
        )?;

        let with_bias = |bias: &Tensor| -> Result<Tensor> {
            Ok(q
                .broadcast_add(&bias.to_dtype(q.dtype())?)?
                .transpose(1, 2)?
                .contiguous()?)
        };
        let content = with_bias(&params.u_bias)?.matmul(&k.transpose(2, 3)?.contiguous()?)?;
        let position = with_bias(&params.v_bias)?.matmul(&p.transpose(2, 3)?.contiguous()?)?;
        let scores = content.add(&relative_shift(&position)?)?;
        Ok(scores.affine(1.0 / (d_model as f64).sqrt(), 0.0)?)
    }

    /// Returns the `d_model`-wide context `[batch, q_len, d_model]` and the
    /// per-head weights `[batch, heads, q_len, k_len]`.
    pub fn attend_relative(
        &self,
        query: &Tensor,
        keys: &Tensor,
        values: &Tensor,
        pos_embedding: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
    ) -> Result<AttentionOutput> {
        config.validate()?;
        log_first_call(Self::NAME, config);
        let dims = check_inputs(query, keys, values)?;
        expect_feature_dim("values", dims.v_dim, self.config.d_model)?;

        let (q, k, v) = ops::cast_inputs(config.precision, query, keys, values)?;
        let scores = self.score_relative(&q, &k, pos_embedding)?;
        let scores = ops::apply_mask(&scores, mask)?;
        let weights = ops::stable_softmax(&scores)?;

        let v = ops::split_heads(
            &ops::project(&self.params.value_proj, &v)?,
            self.config.num_heads,
            self.head_dim,
        )?;
        let context = ops::weighted_sum(&weights, &v, config)?;
        let context = ops::project(&self.params.out_proj, &ops::merge_heads(&context)?)?;
        AttentionOutput::new(context, weights).cast(query.dtype())
    }
}

/// Re-indexes absolute-position scores `[b, h, q, p]` into relative ones by
/// padding a zero column, viewing as `[b, h, p + 1, q]` and dropping the
/// first row.
pub(crate) fn relative_shift(scores: &Tensor) -> Result<Tensor> {
    let (batch, heads, q_len, p_len) = scores.dims4()?;
    let zeros = Tensor::zeros((batch, heads, q_len, 1), scores.dtype(), scores.device())?;
    let padded = Tensor::cat(&[&zeros, scores], 3)?
        .contiguous()?
        .reshape((batch, heads, p_len + 1, q_len))?;
    Ok(padded
        .narrow(2, 1, p_len)?
        .contiguous()?
        .reshape((batch, heads, q_len, p_len))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AttentionScorer;
    use crate::scorers::ScaledDotProductAttention;

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
        a.sub(b).unwrap().abs().unwrap().max_all().unwrap().to_vec0::<f32>().unwrap()
    }

    #[test]
    fn shift_moves_scores_to_relative_offsets() -> Result<()> {
        let scores = Tensor::from_vec(vec![1f32, 2.0, 3.0, 4.0], (1, 1, 2, 2), &Device::Cpu)?;
        let shifted = relative_shift(&scores)?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(shifted, vec![2.0, 0.0, 3.0, 4.0]);
        Ok(())
    }

    #[test]
    fn outputs_keep_model_width_and_normalise_per_head() -> Result<()> {
        let device = Device::Cpu;
        let rel = RelativeMultiHeadAttention::new(RelativeMultiHeadConfig::new(16, 4), &device, DType::F32)?;
        let x = Tensor::randn(0f32, 1.0, (2, 5, 16), &device)?;
        let pos = Tensor::randn(0f32, 1.0, (2, 5, 16), &device)?;
        let out = rel.attend_relative(&x, &x, &x, &pos, None, &Config::default())?;
        assert_eq!(out.context.dims(), &[2, 5, 16]);
        assert_eq!(out.weights.dims(), &[2, 4, 5, 5]);
        let sums = out.weights.sum(3)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-5));
        Ok(())
    }

    #[test]
    fn zero_positions_and_biases_reduce_to_scaled_dot_product() -> Result<()> {
        let device = Device::Cpu;
        let id = |bias| Linear::identity(4, bias, &device, DType::F32);
        let zeros = Tensor::zeros((1, 4), DType::F32, &device)?;
        let params = RelativeMultiHeadParams {
            query_proj: id(true)?,
            key_proj: id(true)?,
            value_proj: id(true)?,
            pos_proj: id(false)?,
            out_proj: id(true)?,
            u_bias: zeros.clone(),
            v_bias: zeros,
        };
        let rel = RelativeMultiHeadAttention::from_parts(RelativeMultiHeadConfig::new(4, 1), params)?;

        let q = Tensor::randn(0f32, 1.0, (2, 3, 4), &device)?;
        let k = Tensor::randn(0f32, 1.0, (2, 3, 4), &device)?;
        let v = Tensor::randn(0f32, 1.0, (2, 3, 4), &device)?;
        let pos = Tensor::zeros((2, 3, 4), DType::F32, &device)?;
        let ours = rel.attend_relative(&q, &k, &v, &pos, None, &Config::default())?;
        let reference = ScaledDotProductAttention::new().attend(&q, &k, &v, None, &Config::default())?;
        assert!(max_abs_diff(&ours.context, &reference.context) < 1e-5);
        assert!(max_abs_diff(&ours.weights.squeeze(1)?, &reference.weights) < 1e-5);
        Ok(())
    }

    #[test]
    fn positional_length_must_match_keys() {
        let device = Device::Cpu;
        let rel = RelativeMultiHeadAttention::new(RelativeMultiHeadConfig::new(8, 2), &device, DType::F32)
            .unwrap();
        let x = Tensor::zeros((1, 3, 8), DType::F32, &device).unwrap();
        let pos = Tensor::zeros((1, 4, 8), DType::F32, &device).unwrap();
        let err = rel
            .attend_relative(&x, &x, &x, &pos, None, &Config::default())
            .unwrap_err();
        assert!(matches!(err, AttentionError::ShapeMismatch { .. }));
    }

    #[test]
    fn indivisible_heads_are_rejected() {
        let err = RelativeMultiHeadAttention::new(RelativeMultiHeadConfig::new(10, 4), &Device::Cpu, DType::F32)
            .unwrap_err();
        assert!(matches!(err, AttentionError::InvalidConfig { .. }));
    }
}

//! Multi-head attention from "Attention Is All You Need".
//!
//! Queries, keys, and values are projected into `num_heads` subspaces, each
//! head runs [`ScaledDotProductAttention`], and the concatenated head outputs
//! are projected back to `d_model`.

use candle_core::{DType, Device, Tensor};
use layers::{Linear, LinearConfig, LinearInit};
use serde::Deserialize;

use super::scaled_dot::ScaledDotProductAttention;
use crate::core::validate::{check_inputs, check_query_keys, expect_feature_dim};
use crate::core::{log_first_call, AttentionError, AttentionOutput, AttentionScorer, Config, Result};
use crate::ops;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MultiHeadConfig {
    /// Width of the inputs and of the output context.
    pub d_model: usize,
    pub num_heads: usize,
    /// Per-head width. Defaults to `d_model / num_heads`, which must then
    /// divide evenly.
    #[serde(default)]
    pub head_dim: Option<usize>,
}

impl Default for MultiHeadConfig {
    fn default() -> Self {
        Self {
            d_model: 512,
            num_heads: 8,
            head_dim: None,
        }
    }
}

impl MultiHeadConfig {
    pub fn new(d_model: usize, num_heads: usize) -> Self {
        Self {
            d_model,
            num_heads,
            head_dim: None,
        }
    }

    pub fn with_head_dim(mut self, head_dim: usize) -> Self {
        self.head_dim = Some(head_dim);
        self
    }

    pub fn resolved_head_dim(&self) -> Result<usize> {
        if self.d_model == 0 || self.num_heads == 0 {
            return Err(AttentionError::config(format!(
                "d_model and num_heads must be non-zero, got {} and {}",
                self.d_model, self.num_heads
            )));
        }
        match self.head_dim {
            Some(0) => Err(AttentionError::config("head_dim must be non-zero")),
            Some(head_dim) => Ok(head_dim),
            None if self.d_model % self.num_heads != 0 => Err(AttentionError::config(format!(
                "d_model {} must be divisible by num_heads {}",
                self.d_model, self.num_heads
            ))),
            None => Ok(self.d_model / self.num_heads),
        }
    }

    /// Concatenated width of all heads.
    pub fn inner_dim(&self) -> Result<usize> {
        Ok(self.resolved_head_dim()? * self.num_heads)
    }

    pub fn validate(&self) -> Result<()> {
        self.resolved_head_dim().map(|_| ())
    }
}

#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    config: MultiHeadConfig,
    head_dim: usize,
    query_proj: Linear,
    key_proj: Linear,
    value_proj: Linear,
    out_proj: Linear,
    inner: ScaledDotProductAttention,
}

impl MultiHeadAttention {
    pub fn new(config: MultiHeadConfig, device: &Device, dtype: DType) -> Result<Self> {
        let inner_dim = config.inner_dim()?;
        let d_model = config.d_model;
        let proj = |input: usize, output: usize| {
            Linear::with_init(
                LinearConfig::new(input, output),
                &LinearInit::XavierUniform,
                device,
                dtype,
            )
        };
        let scorer = Self::from_parts(
            config,
            proj(d_model, inner_dim)?,
            proj(d_model, inner_dim)?,
            proj(d_model, inner_dim)?,
            proj(inner_dim, d_model)?,
        )?;
        log::debug!(
            "attention::multi_head init d_model={d_model} heads={} head_dim={} dtype={dtype:?}",
            scorer.config.num_heads,
            scorer.head_dim
        );
        Ok(scorer)
    }

    /// Input projections map `d_model -> num_heads * head_dim`, the output
    /// projection maps back.
    pub fn from_parts(
        config: MultiHeadConfig,
        query_proj: Linear,
        key_proj: Linear,
        value_proj: Linear,
        out_proj: Linear,
    ) -> Result<Self> {
        let head_dim = config.resolved_head_dim()?;
        let inner_dim = head_dim * config.num_heads;
        let d_model = config.d_model;
        let expected = [
            ("query", &query_proj, d_model, inner_dim),
            ("key", &key_proj, d_model, inner_dim),
            ("value", &value_proj, d_model, inner_dim),
            ("output", &out_proj, inner_dim, d_model),
        ];
        for (label, proj, input, output) in expected {
            let cfg = proj.config();
            if cfg.input_dim != input || cfg.output_dim != output {
                return Err(AttentionError::config(format!(
                    "{label} projection must be {input} -> {output}, got {} -> {}",
                    cfg.input_dim, cfg.output_dim
                )));
            }
        }
        Ok(Self {
            config,
            head_dim,
            query_proj,
            key_proj,
            value_proj,
            out_proj,
            inner: ScaledDotProductAttention::new(),
        })
    }

    pub fn config(&self) -> &MultiHeadConfig {
        &self.config
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    /// Projects `input` and folds the heads into the batch axis:
    /// `[b, len, d_model]` -> `[b * heads, len, head_dim]`.
    fn fold_heads(&self, proj: &Linear, input: &Tensor) -> Result<Tensor> {
        let (batch, len, _) = input.dims3()?;
        let heads = self.config.num_heads;
        let split = ops::split_heads(&ops::project(proj, input)?, heads, self.head_dim)?;
        Ok(split.reshape((batch * heads, len, self.head_dim))?)
    }

    fn check_model_dim(&self, label: &str, tensor: &Tensor) -> Result<()> {
        let width = tensor.dims().last().copied().unwrap_or(0);
        expect_feature_dim(label, width, self.config.d_model)
    }
}

impl AttentionScorer for MultiHeadAttention {
    fn name(&self) -> &'static str {
        "multi_head"
    }

    /// Per-head scaled scores, `[batch, num_heads, q_len, k_len]`.
    fn score(&self, query: &Tensor, keys: &Tensor) -> Result<Tensor> {
        let dims = check_query_keys(query, keys)?;
        self.check_model_dim("query", query)?;
        self.check_model_dim("keys", keys)?;

        let q = self.fold_heads(&self.query_proj, query)?;
        let k = self.fold_heads(&self.key_proj, keys)?;
        let scores = self.inner.score(&q, &k)?;
        Ok(scores.reshape((dims.batch, self.config.num_heads, dims.q_len, dims.k_len))?)
    }

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
        let dims = check_inputs(query, keys, values)?;
        self.check_model_dim("query", query)?;
        self.check_model_dim("keys", keys)?;
        self.check_model_dim("values", values)?;

        let (batch, q_len, k_len) = (dims.qk.batch, dims.qk.q_len, dims.qk.k_len);
        let heads = self.config.num_heads;
        let (q, k, v) = ops::cast_inputs(config.precision, query, keys, values)?;
        let q = self.fold_heads(&self.query_proj, &q)?;
        let k = self.fold_heads(&self.key_proj, &k)?;
        let v = self.fold_heads(&self.value_proj, &v)?;

        let mask = match mask {
            Some(mask) => Some(
                ops::broadcast_mask(mask, &[batch, heads, q_len, k_len])?
                    .contiguous()?
                    .reshape((batch * heads, q_len, k_len))?,
            ),
            None => None,
        };

        let (context, weights) = self
            .inner
            .attend(&q, &k, &v, mask.as_ref(), config)?
            .into_parts();
        let weights = weights.reshape((batch, heads, q_len, k_len))?;
        let context = context.reshape((batch, heads, q_len, self.head_dim))?;
        let context = ops::project(&self.out_proj, &ops::merge_heads(&context)?)?;
        AttentionOutput::new(context, weights).cast(query.dtype())
    }
}

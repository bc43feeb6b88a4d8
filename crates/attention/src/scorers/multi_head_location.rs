//! Location-aware attention split across several heads.
//!
//! The previous per-head alignment `[batch, heads, k_len]` is convolved into
//! `conv_out_channels` features, projected to the head width and squashed by
//! `tanh`. The resulting location energy is shared by every head:
//!
//! `score_h(q, k_j) = w · tanh(W_h q + V_h k_j + tanh(L conv(prev))_j + b)`.

use candle_core::{DType, Device, Tensor};
use layers::{Conv1d, Conv1dConfig, Linear, LinearConfig, LinearInit};
use serde::Deserialize;

use super::energy::AlignmentEnergy;
use super::location_aware::LOCATION_KERNEL_SIZE;
use crate::core::validate::{check_inputs, check_query_keys, expect_feature_dim, previous_alignment};
use crate::core::{log_first_call, AttentionError, AttentionOutput, AttentionScorer, Config, Result};
use crate::ops;

fn default_num_heads() -> usize {
    8
}

fn default_conv_out_channels() -> usize {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MultiHeadLocationAwareConfig {
    pub hidden_dim: usize,
    #[serde(default = "default_num_heads")]
    pub num_heads: usize,
    #[serde(default = "default_conv_out_channels")]
    pub conv_out_channels: usize,
}

impl MultiHeadLocationAwareConfig {
    pub fn new(hidden_dim: usize, num_heads: usize) -> Self {
        Self {
            hidden_dim,
            num_heads,
            conv_out_channels: default_conv_out_channels(),
        }
    }

    pub fn head_dim(&self) -> Result<usize> {
        if self.hidden_dim == 0 || self.num_heads == 0 || self.hidden_dim % self.num_heads != 0 {
            return Err(AttentionError::config(format!(
                "hidden_dim {} must be a non-zero multiple of num_heads {}",
                self.hidden_dim, self.num_heads
            )));
        }
        Ok(self.hidden_dim / self.num_heads)
    }

    pub fn validate(&self) -> Result<()> {
        if self.conv_out_channels == 0 {
            return Err(AttentionError::config("conv_out_channels must be non-zero"));
        }
        self.head_dim().map(|_| ())
    }
}

#[derive(Debug, Clone)]
pub struct MultiHeadLocationAwareAttention {
    config: MultiHeadLocationAwareConfig,
    head_dim: usize,
    location_conv: Conv1d,
    location_proj: Linear,
    query_proj: Linear,
    key_proj: Linear,
    energy: AlignmentEnergy,
}

impl MultiHeadLocationAwareAttention {
    pub fn new(config: MultiHeadLocationAwareConfig, device: &Device, dtype: DType) -> Result<Self> {
        config.validate()?;
        let head_dim = config.head_dim()?;
        let hidden = config.hidden_dim;
        let location_conv = Conv1d::with_init(
            Conv1dConfig::same(config.num_heads, config.conv_out_channels, LOCATION_KERNEL_SIZE),
            device,
            dtype,
        )?;
        let proj = |input: usize, output: usize| {
            Linear::with_init(
                LinearConfig::without_bias(input, output),
                &LinearInit::XavierUniform,
                device,
                dtype,
            )
        };
        let location_proj = proj(config.conv_out_channels, head_dim)?;
        let query_proj = proj(hidden, hidden)?;
        let key_proj = proj(hidden, hidden)?;
        let energy = AlignmentEnergy::new(head_dim, device, dtype)?;
        log::debug!(
            "attention::multi_head_location init hidden_dim={hidden} heads={} conv_out={} dtype={dtype:?}",
            config.num_heads,
            config.conv_out_channels
        );
        Self::from_parts(config, location_conv, location_proj, query_proj, key_proj, energy)
    }

    pub fn from_parts(
        config: MultiHeadLocationAwareConfig,
        location_conv: Conv1d,
        location_proj: Linear,
        query_proj: Linear,
        key_proj: Linear,
        energy: AlignmentEnergy,
    ) -> Result<Self> {
        config.validate()?;
        let head_dim = config.head_dim()?;
        let hidden = config.hidden_dim;
        let conv = location_conv.config();
        if conv.in_channels != config.num_heads
            || conv.out_channels != config.conv_out_channels
            || conv.kernel_size != 2 * conv.padding + 1
        {
            return Err(AttentionError::config(format!(
                "location conv must map {} -> {} channels preserving length, got {conv:?}",
                config.num_heads, config.conv_out_channels
            )));
        }
        let expected = [
            ("location", &location_proj, config.conv_out_channels, head_dim),
            ("query", &query_proj, hidden, hidden),
            ("key", &key_proj, hidden, hidden),
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
        if energy.hidden_dim() != head_dim {
            return Err(AttentionError::config(format!(
                "energy width {} does not match head_dim {head_dim}",
                energy.hidden_dim()
            )));
        }
        Ok(Self {
            config,
            head_dim,
            location_conv,
            location_proj,
            query_proj,
            key_proj,
            energy,
        })
    }

    pub fn config(&self) -> &MultiHeadLocationAwareConfig {
        &self.config
    }

    /// `[batch, heads, k_len]` alignment -> `[batch, k_len, head_dim]` energy.
    fn location_energy(&self, previous: &Tensor) -> Result<Tensor> {
        let features = self.location_conv.forward(previous)?.transpose(1, 2)?;
        Ok(ops::project(&self.location_proj, &features)?.tanh()?)
    }

    /// Per-head scores `[batch, heads, q_len, k_len]` given the previous
    /// alignment `[batch, heads, k_len]` (zeros when `None`).
    pub fn score_with_previous(
        &self,
        query: &Tensor,
        keys: &Tensor,
        previous: Option<&Tensor>,
    ) -> Result<Tensor> {
        let dims = check_query_keys(query, keys)?;
        expect_feature_dim("query", dims.q_dim, self.config.hidden_dim)?;
        expect_feature_dim("keys", dims.k_dim, self.config.hidden_dim)?;

        let heads = self.config.num_heads;
        let previous = previous_alignment(previous, &[dims.batch, heads, dims.k_len], keys)?;
        let location = self.location_energy(&previous)?;

        let q = ops::split_heads(&ops::project(&self.query_proj, query)?, heads, self.head_dim)?;
        let k = ops::split_heads(&ops::project(&self.key_proj, keys)?, heads, self.head_dim)?;
        let keyed = k.broadcast_add(&location.to_dtype(k.dtype())?.unsqueeze(1)?)?;
        // [b, h, q, 1, d] + [b, h, 1, k, d] -> [b, h, q, k, d]
        let pairs = q.unsqueeze(3)?.broadcast_add(&keyed.unsqueeze(2)?)?;
        self.energy.forward(&pairs)
    }

    /// Returns the merged context `[batch, q_len, hidden_dim]` and per-head
    /// weights `[batch, heads, q_len, k_len]`.
    pub fn attend_with_previous(
        &self,
        query: &Tensor,
        keys: &Tensor,
        values: &Tensor,
        previous: Option<&Tensor>,
        mask: Option<&Tensor>,
        config: &Config,
    ) -> Result<AttentionOutput> {
        config.validate()?;
        log_first_call(self.name(), config);
        let dims = check_inputs(query, keys, values)?;
        expect_feature_dim("values", dims.v_dim, self.config.hidden_dim)?;

        let (q, k, v) = ops::cast_inputs(config.precision, query, keys, values)?;
        let scores = self.score_with_previous(&q, &k, previous)?;
        let scores = ops::apply_mask(&scores, mask)?;
        let weights = ops::stable_softmax(&scores)?;
        let v = ops::split_heads(&v, self.config.num_heads, self.head_dim)?;
        let context = ops::merge_heads(&ops::weighted_sum(&weights, &v, config)?)?;
        AttentionOutput::new(context, weights).cast(query.dtype())
    }
}

impl AttentionScorer for MultiHeadLocationAwareAttention {
    fn name(&self) -> &'static str {
        "multi_head_location_aware"
    }

    fn score(&self, query: &Tensor, keys: &Tensor) -> Result<Tensor> {
        self.score_with_previous(query, keys, None)
    }

    fn attend(
        &self,
        query: &Tensor,
        keys: &Tensor,
        values: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
    ) -> Result<AttentionOutput> {
        self.attend_with_previous(query, keys, values, None, mask, config)
    }
}

//! Location-aware attention from "Attention-Based Models for Speech
//! Recognition".
//!
//! The previous step's alignment is convolved into per-position location
//! features so the scorer can track where it attended last:
//!
//! `score(q, k_j) = w · tanh(W q + V k_j + U f_j + b)`, `f = conv1d(prev)`.
//!
//! With smoothing enabled the scores are squashed by a sigmoid and divided by
//! their row sum instead of going through a softmax.

use candle_core::{DType, Device, Tensor};
use layers::{Conv1d, Conv1dConfig, Linear, LinearConfig, LinearInit};
use serde::Deserialize;

use super::energy::AlignmentEnergy;
use crate::core::validate::{check_inputs, check_query_keys, expect_feature_dim, previous_alignment};
use crate::core::{log_first_call, AttentionError, AttentionOutput, AttentionScorer, Config, Result};
use crate::ops;

/// Kernel width of the location convolution.
pub const LOCATION_KERNEL_SIZE: usize = 3;

fn default_smoothing() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LocationAwareConfig {
    /// Width of queries, keys, and the location features.
    pub hidden_dim: usize,
    /// Normalise with `sigmoid / sum` instead of softmax.
    #[serde(default = "default_smoothing")]
    pub smoothing: bool,
}

impl LocationAwareConfig {
    pub fn new(hidden_dim: usize) -> Self {
        Self {
            hidden_dim,
            smoothing: default_smoothing(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.hidden_dim == 0 {
            return Err(AttentionError::config("hidden_dim must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LocationAwareAttention {
    config: LocationAwareConfig,
    location_conv: Conv1d,
    query_proj: Linear,
    key_proj: Linear,
    energy: AlignmentEnergy,
}

impl LocationAwareAttention {
    pub fn new(config: LocationAwareConfig, device: &Device, dtype: DType) -> Result<Self> {
        config.validate()?;
        let hidden = config.hidden_dim;
        let location_conv = Conv1d::with_init(
            Conv1dConfig::same(1, hidden, LOCATION_KERNEL_SIZE),
            device,
            dtype,
        )?;
        let proj = || {
            Linear::with_init(
                LinearConfig::without_bias(hidden, hidden),
                &LinearInit::XavierUniform,
                device,
                dtype,
            )
        };
        let (query_proj, key_proj) = (proj()?, proj()?);
        let energy = AlignmentEnergy::new(hidden, device, dtype)?;
        log::debug!(
            "attention::location_aware init hidden_dim={hidden} smoothing={} dtype={dtype:?}",
            config.smoothing
        );
        Self::from_parts(config, location_conv, query_proj, key_proj, energy)
    }

    /// Assembles the scorer from explicit parameters. The convolution must map
    /// one channel to `hidden_dim` channels; both projections are
    /// `hidden_dim -> hidden_dim`.
    pub fn from_parts(
        config: LocationAwareConfig,
        location_conv: Conv1d,
        query_proj: Linear,
        key_proj: Linear,
        energy: AlignmentEnergy,
    ) -> Result<Self> {
        config.validate()?;
        let hidden = config.hidden_dim;
        let conv = location_conv.config();
        if conv.in_channels != 1 || conv.out_channels != hidden {
            return Err(AttentionError::config(format!(
                "location conv must map 1 -> {hidden} channels, got {} -> {}",
                conv.in_channels, conv.out_channels
            )));
        }
        if conv.kernel_size != 2 * conv.padding + 1 {
            return Err(AttentionError::config(
                "location conv must preserve the sequence length",
            ));
        }
        for (label, proj) in [("query", &query_proj), ("key", &key_proj)] {
            let cfg = proj.config();
            if cfg.input_dim != hidden || cfg.output_dim != hidden {
                return Err(AttentionError::config(format!(
                    "{label} projection must be {hidden} -> {hidden}, got {} -> {}",
                    cfg.input_dim, cfg.output_dim
                )));
            }
        }
        if energy.hidden_dim() != hidden {
            return Err(AttentionError::config(format!(
                "energy width {} does not match hidden_dim {hidden}",
                energy.hidden_dim()
            )));
        }
        Ok(Self {
            config,
            location_conv,
            query_proj,
            key_proj,
            energy,
        })
    }

    pub fn config(&self) -> &LocationAwareConfig {
        &self.config
    }

    /// Raw scores `[batch, q_len, k_len]` given the previous alignment
    /// `[batch, k_len]` (zeros when `None`).
    pub fn score_with_previous(
        &self,
        query: &Tensor,
        keys: &Tensor,
        previous: Option<&Tensor>,
    ) -> Result<Tensor> {
        let dims = check_query_keys(query, keys)?;
        expect_feature_dim("query", dims.q_dim, self.config.hidden_dim)?;
        expect_feature_dim("keys", dims.k_dim, self.config.hidden_dim)?;

        let previous = previous_alignment(previous, &[dims.batch, dims.k_len], keys)?;
        // [b, k] -> [b, 1, k] -> [b, hidden, k] -> [b, k, hidden]
        let location = self
            .location_conv
            .forward(&previous.unsqueeze(1)?)?
            .transpose(1, 2)?;

        let q = ops::project(&self.query_proj, query)?;
        let k = ops::project(&self.key_proj, keys)?;
        let keyed = k.add(&location.to_dtype(k.dtype())?)?;
        let pairs = q.unsqueeze(2)?.broadcast_add(&keyed.unsqueeze(1)?)?;
        self.energy.forward(&pairs)
    }

    /// Attends over `values` conditioned on the previous alignment. Feed
    /// [`AttentionOutput::last_alignment`] back in on the next decoding step.
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
        check_inputs(query, keys, values)?;

        let (q, k, v) = ops::cast_inputs(config.precision, query, keys, values)?;
        let scores = self.score_with_previous(&q, &k, previous)?;
        let scores = ops::apply_mask(&scores, mask)?;
        let weights = if self.config.smoothing {
            ops::smoothed_normalize(&scores)?
        } else {
            ops::stable_softmax(&scores)?
        };
        let context = ops::weighted_sum(&weights, &v, config)?;
        AttentionOutput::new(context, weights).cast(query.dtype())
    }
}

impl AttentionScorer for LocationAwareAttention {
    fn name(&self) -> &'static str {
        "location_aware"
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

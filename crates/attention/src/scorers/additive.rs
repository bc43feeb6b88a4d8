//! Additive (Bahdanau) attention from "Neural Machine Translation by Jointly
//! Learning to Align and Translate".
//!
//! `score(q, k) = v · tanh(W[q; k] + b)`. The concatenated weight is held as
//! two square blocks, `W = [W_q W_k]`, so every (query, key) pair is scored
//! by broadcasting `W_q q` against `W_k k` instead of materialising the
//! concatenation.

use candle_core::{DType, Device, Tensor};
use layers::{Linear, LinearConfig, LinearInit};

use super::energy::AlignmentEnergy;
use crate::core::validate::{check_query_keys, expect_feature_dim};
use crate::core::{AttentionError, AttentionScorer, Result};
use crate::ops;

#[derive(Debug, Clone)]
pub struct AdditiveAttention {
    hidden_dim: usize,
    query_proj: Linear,
    key_proj: Linear,
    energy: AlignmentEnergy,
}

impl AdditiveAttention {
    /// Randomly initialised scorer for `hidden_dim`-wide queries and keys.
    pub fn new(hidden_dim: usize, device: &Device, dtype: DType) -> Result<Self> {
        let proj = || {
            Linear::with_init(
                LinearConfig::without_bias(hidden_dim, hidden_dim),
                &LinearInit::XavierUniform,
                device,
                dtype,
            )
        };
        let scorer = Self::from_parts(
            proj()?,
            proj()?,
            AlignmentEnergy::new(hidden_dim, device, dtype)?,
        )?;
        log::debug!("attention::additive init hidden_dim={hidden_dim} dtype={dtype:?}");
        Ok(scorer)
    }

    /// Assembles the scorer from explicit parameters. Both projections must
    /// be `hidden -> hidden` where `hidden` is the energy width.
    pub fn from_parts(query_proj: Linear, key_proj: Linear, energy: AlignmentEnergy) -> Result<Self> {
        let hidden_dim = energy.hidden_dim();
        for (label, proj) in [("query", &query_proj), ("key", &key_proj)] {
            let cfg = proj.config();
            if cfg.input_dim != hidden_dim || cfg.output_dim != hidden_dim {
                return Err(AttentionError::config(format!(
                    "{label} projection must be {hidden_dim} -> {hidden_dim}, got {} -> {}",
                    cfg.input_dim, cfg.output_dim
                )));
            }
        }
        Ok(Self {
            hidden_dim,
            query_proj,
            key_proj,
            energy,
        })
    }

    /// Builds the scorer from the concatenated weight `W` of shape
    /// `[hidden, 2 * hidden]` acting on `[q; k]`.
    pub fn from_concatenated(weight: &Tensor, energy: AlignmentEnergy) -> Result<Self> {
        let hidden_dim = energy.hidden_dim();
        if weight.dims() != [hidden_dim, 2 * hidden_dim] {
            return Err(AttentionError::shape(format!(
                "concatenated weight must have shape [{hidden_dim}, {}], got {:?}",
                2 * hidden_dim,
                weight.dims()
            )));
        }
        let block = |offset: usize| -> Result<Linear> {
            Ok(Linear::new(
                LinearConfig::without_bias(hidden_dim, hidden_dim),
                weight.narrow(1, offset, hidden_dim)?.contiguous()?,
                None,
            )?)
        };
        Self::from_parts(block(0)?, block(hidden_dim)?, energy)
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }
}

impl AttentionScorer for AdditiveAttention {
    fn name(&self) -> &'static str {
        "additive"
    }

    fn score(&self, query: &Tensor, keys: &Tensor) -> Result<Tensor> {
        let dims = check_query_keys(query, keys)?;
        expect_feature_dim("query", dims.q_dim, self.hidden_dim)?;
        expect_feature_dim("keys", dims.k_dim, self.hidden_dim)?;

        let q = ops::project(&self.query_proj, query)?;
        let k = ops::project(&self.key_proj, keys)?;
        // [b, q, 1, h] + [b, 1, k, h] -> [b, q, k, h]
        let pairs = q.unsqueeze(2)?.broadcast_add(&k.unsqueeze(1)?)?;
        self.energy.forward(&pairs)
    }
}

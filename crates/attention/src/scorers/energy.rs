//! Alignment energy `proj(tanh(x + b))` shared by the additive and
//! location-aware scorers.

use candle_core::{DType, Device, Tensor, D};
use layers::{Linear, LinearConfig, LinearInit};

use crate::core::{AttentionError, Result};

/// Bound of the uniform initialisation of the energy bias.
pub const ENERGY_BIAS_INIT_BOUND: f64 = 0.1;

/// Reduces `[.., hidden]` features to one scalar energy per position.
#[derive(Debug, Clone)]
pub struct AlignmentEnergy {
    hidden_dim: usize,
    bias: Tensor,
    proj: Linear,
}

impl AlignmentEnergy {
    pub fn new(hidden_dim: usize, device: &Device, dtype: DType) -> Result<Self> {
        let bias = LinearInit::Uniform {
            bound: ENERGY_BIAS_INIT_BOUND,
        }
        .sample(&[hidden_dim], device, dtype)?;
        let proj = Linear::with_init(
            LinearConfig::new(hidden_dim, 1),
            &LinearInit::XavierUniform,
            device,
            dtype,
        )?;
        Self::from_parts(bias, proj)
    }

    /// `bias` is `[hidden]`; `proj` must map `hidden -> 1`.
    pub fn from_parts(bias: Tensor, proj: Linear) -> Result<Self> {
        let hidden_dim = proj.config().input_dim;
        if proj.config().output_dim != 1 {
            return Err(AttentionError::config(format!(
                "energy projection must produce one output, got {}",
                proj.config().output_dim
            )));
        }
        if bias.dims() != [hidden_dim] {
            return Err(AttentionError::shape(format!(
                "energy bias must have shape [{hidden_dim}], got {:?}",
                bias.dims()
            )));
        }
        Ok(Self {
            hidden_dim,
            bias,
            proj,
        })
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// `[.., hidden]` -> `[..]`.
    pub fn forward(&self, features: &Tensor) -> Result<Tensor> {
        let bias = self.bias.to_dtype(features.dtype())?;
        let activated = features.broadcast_add(&bias)?.tanh()?;
        Ok(self
            .proj
            .forward(&activated)?
            .to_dtype(features.dtype())?
            .squeeze(D::Minus1)?)
    }
}

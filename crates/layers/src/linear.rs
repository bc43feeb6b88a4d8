//! Dense affine projections.
//!
//! [`Linear`] projects the trailing axis of an input of any rank, so the same
//! layer serves `(batch, seq, hidden)` activations and the
//! `(batch, q_len, k_len, hidden)` pairwise energies built by additive
//! attention. Matmuls run in [`PrecisionPolicy::compute`] and results are cast
//! back to the parameter storage dtype.

use candle_core::{DType, Device, Tensor};

use crate::{checks, dtypes::PrecisionPolicy, LayerError, Result};

/// Configuration for a dense projection layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    /// Output feature dimension.
    pub output_dim: usize,
    /// Whether a learnable bias vector is applied.
    pub bias: bool,
}

impl LinearConfig {
    /// Creates a configuration with a bias term.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: true,
        }
    }

    /// Creates a configuration without a bias term.
    pub fn without_bias(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: false,
        }
    }
}

/// Weight initialisation policies.
#[derive(Debug, Clone)]
pub enum LinearInit {
    /// Xavier/Glorot uniform initialisation.
    XavierUniform,
    /// Xavier/Glorot normal initialisation.
    XavierNormal,
    /// Kaiming/He uniform initialisation.
    KaimingUniform { negative_slope: f64 },
    /// Kaiming/He normal initialisation.
    KaimingNormal { negative_slope: f64 },
    /// Uniform samples in `[-bound, bound]`.
    Uniform { bound: f64 },
    /// Scales another policy.
    Scaled { base: Box<LinearInit>, scale: f64 },
}

impl LinearInit {
    pub fn scaled(base: LinearInit, scale: f64) -> Self {
        Self::Scaled {
            base: Box::new(base),
            scale,
        }
    }

    /// Samples a tensor of `shape`, treating the first dimension as fan-out and
    /// the product of the rest as fan-in.
    pub fn sample(&self, shape: &[usize], device: &Device, dtype: DType) -> Result<Tensor> {
        let fan_out = shape.first().copied().unwrap_or(1) as f64;
        let fan_in = shape.iter().skip(1).product::<usize>().max(1) as f64;
        let sampled = match self {
            LinearInit::XavierUniform => {
                let bound = (6.0f64 / (fan_in + fan_out)).sqrt() as f32;
                Tensor::rand(-bound, bound, shape, device)?
            }
            LinearInit::XavierNormal => {
                let std = (2.0f64 / (fan_in + fan_out)).sqrt() as f32;
                Tensor::randn(0f32, std, shape, device)?
            }
            LinearInit::KaimingUniform { negative_slope } => {
                let gain = (2.0f64 / (1.0 + negative_slope.powi(2))).sqrt();
                let bound = (3.0f64.sqrt() * gain / fan_in.sqrt()) as f32;
                Tensor::rand(-bound, bound, shape, device)?
            }
            LinearInit::KaimingNormal { negative_slope } => {
                let gain = (2.0f64 / (1.0 + negative_slope.powi(2))).sqrt();
                Tensor::randn(0f32, (gain / fan_in.sqrt()) as f32, shape, device)?
            }
            LinearInit::Uniform { bound } => {
                if *bound <= 0.0 {
                    return Err(LayerError::Config(format!(
                        "uniform init bound must be positive, got {bound}"
                    )));
                }
                let bound = *bound as f32;
                Tensor::rand(-bound, bound, shape, device)?
            }
            LinearInit::Scaled { base, scale } => {
                base.sample(shape, device, DType::F32)?.affine(*scale, 0.0)?
            }
        };
        Ok(sampled.to_dtype(dtype)?)
    }
}

/// Dense affine projection `y = x Wᵀ + b` over the trailing axis.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Tensor,
    bias: Option<Tensor>,
    policy: PrecisionPolicy,
}

impl Linear {
    /// Constructs a layer from existing parameters. `weight` is
    /// `[output_dim, input_dim]`, `bias` is `[output_dim]`.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        if config.input_dim == 0 || config.output_dim == 0 {
            return Err(LayerError::Config(format!(
                "linear dimensions must be non-zero, got {} -> {}",
                config.input_dim, config.output_dim
            )));
        }
        checks::expect_shape(
            "linear.weight",
            &weight,
            &[config.output_dim, config.input_dim],
        )?;
        checks::expect_dtype_in("linear.weight", &weight, checks::FLOAT_DTYPES)?;
        match (config.bias, bias.as_ref()) {
            (true, Some(bias)) => {
                checks::expect_shape("linear.bias", bias, &[config.output_dim])?;
                checks::expect_dtype_in("linear.bias", bias, checks::FLOAT_DTYPES)?;
            }
            (false, Some(_)) => {
                return Err(LayerError::Config(
                    "bias provided but config disables bias".into(),
                ))
            }
            (true, None) => {
                return Err(LayerError::Config(
                    "config expects bias but none supplied".into(),
                ))
            }
            (false, None) => {}
        }
        let policy = PrecisionPolicy::from_parameter_dtype(weight.dtype());
        Ok(Self {
            config,
            weight,
            bias,
            policy,
        })
    }

    /// Builds a layer with weights drawn from `init` and a zero bias.
    pub fn with_init(
        config: LinearConfig,
        init: &LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let weight = init.sample(&[config.output_dim, config.input_dim], device, dtype)?;
        let bias = if config.bias {
            Some(Tensor::zeros(config.output_dim, dtype, device)?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    /// Square projection whose weight is the identity matrix; bias (if any) is zero.
    pub fn identity(dim: usize, bias: bool, device: &Device, dtype: DType) -> Result<Self> {
        let mut data = vec![0f32; dim * dim];
        for i in 0..dim {
            data[i * dim + i] = 1.0;
        }
        let weight = Tensor::from_vec(data, (dim, dim), device)?.to_dtype(dtype)?;
        let config = LinearConfig {
            input_dim: dim,
            output_dim: dim,
            bias,
        };
        let bias = if bias {
            Some(Tensor::zeros(dim, dtype, device)?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    /// Projects the trailing axis of `input`.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        checks::expect_last_dim("linear.input", input, self.config.input_dim)?;

        let dims = input.dims();
        let rows: usize = dims[..dims.len() - 1].iter().product();
        let mut out_dims = dims[..dims.len() - 1].to_vec();
        out_dims.push(self.config.output_dim);

        let flat = self
            .policy
            .cast_for_matmul(input)?
            .reshape((rows, self.config.input_dim))?;
        let weight_t = self.policy.cast_for_matmul(&self.weight)?.t()?;
        let mut output = flat.matmul(&weight_t)?;
        if let Some(bias) = &self.bias {
            output = output.broadcast_add(&self.policy.cast_for_matmul(bias)?)?;
        }
        let output = output.reshape(out_dims)?;
        Ok(self.policy.cast_to_storage(&output)?)
    }
}

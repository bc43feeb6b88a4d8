//! One-dimensional convolution over `(batch, channels, len)` inputs.
//!
//! Location-aware attention convolves the previous alignment to extract
//! location features; this layer carries the kernel and bias for that step.

use candle_core::{DType, Device, Tensor};

use crate::{checks, dtypes::PrecisionPolicy, LayerError, LinearInit, Result};

/// Static shape of a [`Conv1d`] layer. Stride and dilation are fixed to 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conv1dConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub padding: usize,
    pub bias: bool,
}

impl Conv1dConfig {
    /// Length-preserving convolution (`padding = kernel_size / 2`, odd kernels).
    pub fn same(in_channels: usize, out_channels: usize, kernel_size: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size,
            padding: kernel_size / 2,
            bias: true,
        }
    }

    /// Output length for an input of length `len`.
    pub fn output_len(&self, len: usize) -> usize {
        (len + 2 * self.padding + 1).saturating_sub(self.kernel_size)
    }
}

#[derive(Debug, Clone)]
pub struct Conv1d {
    config: Conv1dConfig,
    weight: Tensor,
    bias: Option<Tensor>,
    policy: PrecisionPolicy,
}

impl Conv1d {
    /// `weight` is `[out_channels, in_channels, kernel_size]`, `bias` is `[out_channels]`.
    pub fn new(config: Conv1dConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        if config.in_channels == 0 || config.out_channels == 0 || config.kernel_size == 0 {
            return Err(LayerError::Config(format!(
                "conv1d dimensions must be non-zero: {config:?}"
            )));
        }
        checks::expect_shape(
            "conv1d.weight",
            &weight,
            &[config.out_channels, config.in_channels, config.kernel_size],
        )?;
        checks::expect_dtype_in("conv1d.weight", &weight, checks::FLOAT_DTYPES)?;
        match (config.bias, bias.as_ref()) {
            (true, Some(b)) => checks::expect_shape("conv1d.bias", b, &[config.out_channels])?,
            (false, None) => {}
            _ => {
                return Err(LayerError::Config(
                    "conv1d bias presence must match config".into(),
                ))
            }
        }
        let policy = PrecisionPolicy::from_parameter_dtype(weight.dtype());
        Ok(Self {
            config,
            weight,
            bias,
            policy,
        })
    }

    /// Fan-in uniform initialisation for both kernel and bias.
    pub fn with_init(config: Conv1dConfig, device: &Device, dtype: DType) -> Result<Self> {
        let fan_in = (config.in_channels * config.kernel_size) as f64;
        let init = LinearInit::Uniform {
            bound: 1.0 / fan_in.sqrt(),
        };
        let weight = init.sample(
            &[config.out_channels, config.in_channels, config.kernel_size],
            device,
            dtype,
        )?;
        let bias = if config.bias {
            Some(init.sample(&[config.out_channels], device, dtype)?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    pub fn config(&self) -> &Conv1dConfig {
        &self.config
    }

    /// Convolves `input` shaped `[batch, in_channels, len]`.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        checks::expect_rank("conv1d.input", input, 3)?;
        let (_, channels, len) = input.dims3()?;
        if channels != self.config.in_channels {
            return Err(LayerError::Shape(format!(
                "conv1d.input: expected {} channels, got {channels}",
                self.config.in_channels
            )));
        }
        if self.config.output_len(len) == 0 {
            return Err(LayerError::Shape(format!(
                "conv1d.input: length {len} too short for kernel {}",
                self.config.kernel_size
            )));
        }

        let input = self.policy.cast_for_matmul(input)?.contiguous()?;
        let weight = self.policy.cast_for_matmul(&self.weight)?;
        let mut output = input.conv1d(&weight, self.config.padding, 1, 1, 1)?;
        if let Some(bias) = &self.bias {
            let bias = self
                .policy
                .cast_for_matmul(bias)?
                .reshape((1, self.config.out_channels, 1))?;
            output = output.broadcast_add(&bias)?;
        }
        Ok(self.policy.cast_to_storage(&output)?)
    }
}

//! Precision policy used by the parameterised layers.
//!
//! Parameters may live in `f16`/`bf16` for memory reasons while the matmuls run
//! in `f32`. [`PrecisionPolicy`] keeps the two dtypes together so every layer
//! casts its activations the same way.

use candle_core::{DType, Result, Tensor};

/// Describes how tensors are cast around a layer's forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionPolicy {
    storage: DType,
    compute: DType,
}

impl PrecisionPolicy {
    /// Constructs a policy from explicit dtype selections.
    pub fn new(storage: DType, compute: DType) -> Self {
        Self { storage, compute }
    }

    /// Builds a policy from the parameter storage dtype, promoting half
    /// precision storage to `f32` compute.
    pub fn from_parameter_dtype(storage: DType) -> Self {
        let compute = match storage {
            DType::F16 | DType::BF16 => DType::F32,
            other => other,
        };
        Self::new(storage, compute)
    }

    /// Dtype used to store parameters and layer outputs.
    pub fn storage(&self) -> DType {
        self.storage
    }

    /// Dtype used for matmuls and activations.
    pub fn compute(&self) -> DType {
        self.compute
    }

    pub fn is_mixed_precision(&self) -> bool {
        self.storage != self.compute
    }

    /// Casts a tensor to the compute dtype.
    pub fn cast_for_matmul(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.compute)
    }

    /// Casts a tensor back to the storage dtype.
    pub fn cast_to_storage(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.storage)
    }
}

fn cast_tensor(tensor: &Tensor, dtype: DType) -> Result<Tensor> {
    if tensor.dtype() == dtype {
        Ok(tensor.clone())
    } else {
        tensor.to_dtype(dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn half_precision_parameters_compute_in_f32() {
        let policy = PrecisionPolicy::from_parameter_dtype(DType::BF16);
        assert_eq!(policy.storage(), DType::BF16);
        assert_eq!(policy.compute(), DType::F32);
        assert!(policy.is_mixed_precision());

        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        assert!(!policy.is_mixed_precision());
    }

    #[test]
    fn cast_round_trip_stays_close() -> Result<()> {
        let device = Device::Cpu;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F16);
        let base = Tensor::from_vec(vec![0.125f32, -0.75, 3.5], (3,), &device)?;
        let stored = base.to_dtype(policy.storage())?;

        let compute = policy.cast_for_matmul(&stored)?;
        assert_eq!(compute.dtype(), DType::F32);
        let back = policy.cast_to_storage(&compute)?;
        assert_eq!(back.dtype(), DType::F16);

        let restored = back.to_dtype(DType::F32)?.to_vec1::<f32>()?;
        for (orig, rest) in base.to_vec1::<f32>()?.iter().zip(restored.iter()) {
            assert!((orig - rest).abs() <= 5e-3);
        }
        Ok(())
    }
}

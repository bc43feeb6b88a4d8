//! Error types emitted by the attention scorers.

use layers::LayerError;
use thiserror::Error;

/// Attention-specific error category.
///
/// Every variant is a deterministic, caller-correctable condition; nothing here
/// is transient and no operation retries.
#[derive(Debug, Error)]
pub enum AttentionError {
    /// Tensor shapes, devices, or dtypes do not line up (e.g. keys and values
    /// of different lengths, or a query wider than the projection expects).
    #[error("shape mismatch: {context}")]
    ShapeMismatch { context: String },
    /// Structural or runtime configuration is invalid (e.g. a head count that
    /// does not divide the model dimension).
    #[error("invalid configuration: {context}")]
    InvalidConfig { context: String },
    /// The kernel does not support the requested data type.
    #[error("unsupported dtype {requested}")]
    UnsupportedDType { requested: String },
    /// A backend failure propagated from Candle.
    #[error("{message}")]
    Backend { message: String },
}

impl AttentionError {
    pub(crate) fn shape(context: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
        }
    }

    pub(crate) fn config(context: impl Into<String>) -> Self {
        Self::InvalidConfig {
            context: context.into(),
        }
    }
}

impl From<candle_core::Error> for AttentionError {
    fn from(err: candle_core::Error) -> Self {
        Self::Backend {
            message: err.to_string(),
        }
    }
}

impl From<LayerError> for AttentionError {
    fn from(err: LayerError) -> Self {
        match err {
            LayerError::Shape(context) => Self::ShapeMismatch { context },
            LayerError::Config(context) => Self::InvalidConfig { context },
            LayerError::Backend(err) => err.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AttentionError>;

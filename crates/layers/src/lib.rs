//! Learned-parameter building blocks for the attention scorers.
//!
//! Everything here operates on Candle tensors laid out as `(batch, seq, hidden)`
//! (or `(batch, channels, len)` for convolutions). Parameters are plain tensors
//! owned by the layer; updating them is the job of whatever training loop owns
//! the enclosing model.

pub mod checks;
pub mod conv;
pub mod dtypes;
pub mod linear;

use thiserror::Error;

pub use conv::{Conv1d, Conv1dConfig};
pub use dtypes::PrecisionPolicy;
pub use linear::{Linear, LinearConfig, LinearInit};

/// Errors raised while building layers or running their forward passes.
#[derive(Debug, Error)]
pub enum LayerError {
    /// A tensor did not have the rank, shape, or dtype the layer expects.
    #[error("{0}")]
    Shape(String),
    /// The layer configuration is internally inconsistent.
    #[error("invalid layer configuration: {0}")]
    Config(String),
    /// Failure reported by the tensor backend.
    #[error(transparent)]
    Backend(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, LayerError>;

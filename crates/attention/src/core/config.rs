//! Runtime configuration shared by all scorers.
//!
//! [`Config`] captures knobs callers can change per call without rebuilding a
//! scorer. It deserialises from JSON and can be adjusted from the environment:
//!
//! - `ATTENTION_DROPOUT_P`: dropout probability in `[0, 1)`, or `none`.
//! - `ATTENTION_PRECISION`: `f32` (promote to `f32`) or `inherit`.
//!
//! Unparseable overrides are logged and ignored.

use serde::Deserialize;

use super::errors::{AttentionError, Result};

pub const ENV_DROPOUT_P: &str = "ATTENTION_DROPOUT_P";
pub const ENV_PRECISION: &str = "ATTENTION_PRECISION";

/// Dtype used while scoring and normalising.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputePrecision {
    /// Promote inputs to `f32`; outputs are cast back to the query dtype.
    #[default]
    ForceF32,
    /// Compute in the dtype of the inputs.
    Inherit,
}

impl ComputePrecision {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "f32" | "force_f32" => Some(Self::ForceF32),
            "inherit" => Some(Self::Inherit),
            _ => None,
        }
    }
}

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Probability for dropout applied to the weights used to build the
    /// context. `None` (or `0.0`) keeps the computation deterministic.
    pub dropout_p: Option<f32>,
    /// Working dtype for scores and normalisation.
    pub precision: ComputePrecision,
}

impl Config {
    /// Parses a JSON document such as `{"dropout_p": 0.1, "precision": "inherit"}`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| AttentionError::config(format!("malformed attention config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(p) = self.dropout_p {
            if !(0.0..1.0).contains(&p) {
                return Err(AttentionError::config(format!(
                    "dropout probability must be in [0, 1), got {p}"
                )));
            }
        }
        Ok(())
    }

    /// Dropout probability if dropout is actually enabled.
    pub fn active_dropout(&self) -> Option<f32> {
        self.dropout_p.filter(|p| *p > 0.0)
    }

    /// Applies `ATTENTION_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_with(|key| std::env::var(key).ok());
    }

    /// Applies overrides read through `lookup`.
    pub fn apply_overrides_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_DROPOUT_P) {
            let trimmed = raw.trim();
            if trimmed.eq_ignore_ascii_case("none") {
                self.dropout_p = None;
            } else {
                match trimmed.parse::<f32>() {
                    Ok(p) if (0.0..1.0).contains(&p) => self.dropout_p = Some(p),
                    _ => log::warn!("ignoring {ENV_DROPOUT_P}={raw:?}: expected a value in [0, 1)"),
                }
            }
        }
        if let Some(raw) = lookup(ENV_PRECISION) {
            match ComputePrecision::parse(&raw) {
                Some(precision) => self.precision = precision,
                None => log::warn!("ignoring {ENV_PRECISION}={raw:?}: expected f32 or inherit"),
            }
        }
    }
}

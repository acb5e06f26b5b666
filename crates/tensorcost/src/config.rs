//! Cost-model configuration.
//!
//! Values come from [`CostModelConfig::default`], a JSON document, or the
//! `TENSORCOST_*` environment variables. The communicator width configured here is the
//! one every collective cost formula reads.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::env;
use crate::error::ConfigError;

/// Unit of the `memory_cost` figures.
///
/// One unit applies to every operator, so graph totals never mix elements and bytes.
/// The default counts elements, matching the convolution reference figure of
/// input + weight + output element counts; choose `Bytes` for dtype-accurate traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryUnit {
    /// Element counts; communication payloads are converted from bytes.
    #[default]
    Elements,
    /// Byte counts; every element count is scaled by its tensor's dtype size.
    Bytes,
}

/// How per-operator parallelism folds into one graph figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelismReduction {
    /// Least parallel operator, i.e. the bottleneck stage.
    #[default]
    Min,
    Max,
    Sum,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModelConfig {
    pub world_size: usize,
    pub memory_unit: MemoryUnit,
    pub parallelism: ParallelismReduction,
    /// Relative window inside which two compute times count as tied.
    pub fuse_epsilon: f64,
    pub profile: bool,
}

impl Default for CostModelConfig {
    fn default() -> Self {
        CostModelConfig {
            world_size: 8,
            memory_unit: MemoryUnit::Elements,
            parallelism: ParallelismReduction::Min,
            fuse_epsilon: 1e-9,
            profile: false,
        }
    }
}

static ENV_CONFIG: Lazy<Result<CostModelConfig, String>> =
    Lazy::new(|| CostModelConfig::load_env().map_err(|err| err.to_string()));

impl CostModelConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: CostModelConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Defaults overridden by any `TENSORCOST_*` variables, read once per process.
    pub fn from_env() -> Result<Self, ConfigError> {
        match &*ENV_CONFIG {
            Ok(config) => Ok(config.clone()),
            Err(_) => Self::load_env(),
        }
    }

    fn load_env() -> Result<Self, ConfigError> {
        let mut config = CostModelConfig::default();
        if let Some(value) = env::var(env::WORLD_SIZE) {
            config.world_size = value.parse().map_err(|_| ConfigError::InvalidValue {
                key: env::WORLD_SIZE,
                value: value.clone(),
            })?;
        }
        if let Some(value) = env::var(env::MEMORY_UNIT) {
            config.memory_unit = match value.to_ascii_lowercase().as_str() {
                "elements" | "element" => MemoryUnit::Elements,
                "bytes" | "byte" => MemoryUnit::Bytes,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: env::MEMORY_UNIT,
                        value,
                    })
                }
            };
        }
        if let Some(value) = env::var(env::PARALLELISM) {
            config.parallelism = match value.to_ascii_lowercase().as_str() {
                "min" => ParallelismReduction::Min,
                "max" => ParallelismReduction::Max,
                "sum" => ParallelismReduction::Sum,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: env::PARALLELISM,
                        value,
                    })
                }
            };
        }
        if let Some(value) = env::var(env::FUSE_EPSILON) {
            config.fuse_epsilon = match value.parse::<f64>() {
                Ok(eps) if eps.is_finite() && eps >= 0.0 => eps,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: env::FUSE_EPSILON,
                        value,
                    })
                }
            };
        }
        config.profile = env::profile_enabled();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.world_size == 0 {
            return Err(ConfigError::ZeroWorldSize);
        }
        if !(self.fuse_epsilon.is_finite() && self.fuse_epsilon >= 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "fuse_epsilon",
                value: self.fuse_epsilon.to_string(),
            });
        }
        Ok(())
    }

    pub fn with_world_size(mut self, world_size: usize) -> Self {
        self.world_size = world_size;
        self
    }

    pub fn with_memory_unit(mut self, unit: MemoryUnit) -> Self {
        self.memory_unit = unit;
        self
    }

    pub fn with_parallelism(mut self, reduction: ParallelismReduction) -> Self {
        self.parallelism = reduction;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = CostModelConfig::from_json(r#"{"world_size": 16, "memory_unit": "bytes"}"#)
            .expect("config");
        assert_eq!(config.world_size, 16);
        assert_eq!(config.memory_unit, MemoryUnit::Bytes);
        assert_eq!(config.parallelism, ParallelismReduction::Min);
    }

    #[test]
    fn json_rejects_zero_world_size() {
        let err = CostModelConfig::from_json(r#"{"world_size": 0}"#).expect_err("zero width");
        assert!(matches!(err, ConfigError::ZeroWorldSize));
    }
}

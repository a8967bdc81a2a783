use std::{fs, path::Path};

use attention::MultiheadAttentionConfig;
use candle_core::DType;
use serde::Deserialize;
use thiserror::Error;

use crate::device::DeviceSelection;

/// Hyperparameters of a [`ContextAwareAttention`](crate::ContextAwareAttention) module.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContextAttentionConfig {
    /// Attention feature width of queries, keys and values.
    pub dim_model: usize,
    /// Width of the auxiliary context vectors.
    pub dim_context: usize,
    /// Dropout on attention weights, applied only in training mode.
    #[serde(default)]
    pub dropout_rate: f32,
    #[serde(default = "default_num_heads")]
    pub num_heads: usize,
    #[serde(default)]
    pub device: DeviceSelection,
    #[serde(default)]
    pub precision: Precision,
}

/// Parameter dtype.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    #[default]
    Fp32,
    Fp16,
    Bf16,
}

impl Precision {
    pub fn dtype(&self) -> DType {
        match self {
            Precision::Fp32 => DType::F32,
            Precision::Fp16 => DType::F16,
            Precision::Bf16 => DType::BF16,
        }
    }
}

fn default_num_heads() -> usize {
    1
}

impl ContextAttentionConfig {
    /// Single-head, dropout-free configuration on the CPU in `f32`.
    pub fn new(dim_model: usize, dim_context: usize) -> Self {
        Self {
            dim_model,
            dim_context,
            dropout_rate: 0.0,
            num_heads: default_num_heads(),
            device: DeviceSelection::default(),
            precision: Precision::default(),
        }
    }

    pub fn with_dropout(mut self, dropout_rate: f32) -> Self {
        self.dropout_rate = dropout_rate;
        self
    }

    pub fn with_num_heads(mut self, num_heads: usize) -> Self {
        self.num_heads = num_heads;
        self
    }

    pub fn with_device(mut self, device: DeviceSelection) -> Self {
        self.device = device;
        self
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    /// Load a configuration from a TOML (default) or JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: ContextAttentionConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(ConfigError::Format(format!(
                    "unsupported configuration extension '{other}'"
                )));
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Collects every violated constraint instead of stopping at the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.dim_model == 0 {
            errors.push("dim_model must be greater than 0".to_string());
        }
        if self.dim_context == 0 {
            errors.push("dim_context must be greater than 0".to_string());
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            errors.push(format!(
                "dropout_rate must be in [0, 1), got {}",
                self.dropout_rate
            ));
        }
        if self.num_heads == 0 {
            errors.push("num_heads must be greater than 0".to_string());
        } else if self.dim_model % self.num_heads != 0 {
            errors.push(format!(
                "dim_model ({}) must be divisible by num_heads ({})",
                self.dim_model, self.num_heads
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Settings of the inner attention block: bias on, no zero-attention row.
    pub fn attention_config(&self) -> MultiheadAttentionConfig {
        MultiheadAttentionConfig {
            embed_dim: self.dim_model,
            num_heads: self.num_heads,
            dropout: self.dropout_rate,
            bias: true,
            add_zero_attn: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Format(String),
    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        ConfigError::Format(value.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        ConfigError::Format(value.to_string())
    }
}

impl From<ConfigError> for candle_core::Error {
    fn from(value: ConfigError) -> Self {
        candle_core::Error::Msg(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_mirror_single_head_block() {
        let config = ContextAttentionConfig::new(8, 4);
        assert_eq!(config.num_heads, 1);
        assert_eq!(config.dropout_rate, 0.0);
        assert_eq!(config.precision.dtype(), DType::F32);
        config.validate().unwrap();

        let attn = config.attention_config();
        assert_eq!(attn.embed_dim, 8);
        assert!(attn.bias);
        assert!(!attn.add_zero_attn);
    }

    #[test]
    fn validation_reports_every_problem() {
        let config = ContextAttentionConfig::new(0, 0).with_dropout(1.5);
        match config.validate() {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected validation errors, got {other:?}"),
        }
    }

    #[test]
    fn heads_must_divide_model_width() {
        let config = ContextAttentionConfig::new(10, 4).with_num_heads(3);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("divisible"));
    }

    #[test]
    fn loads_toml_with_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "dim_model = 16\ndim_context = 8\nprecision = \"bf16\"").unwrap();

        let config = ContextAttentionConfig::from_path(file.path()).unwrap();
        assert_eq!(config.dim_model, 16);
        assert_eq!(config.dim_context, 8);
        assert_eq!(config.num_heads, 1);
        assert_eq!(config.device, DeviceSelection::Cpu);
        assert_eq!(config.precision, Precision::Bf16);
    }

    #[test]
    fn loads_json_and_validates() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"dim_model": 12, "dim_context": 3, "num_heads": 5, "device": "auto"}}"#
        )
        .unwrap();

        let err = ContextAttentionConfig::from_path(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_unknown_extensions() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let err = ContextAttentionConfig::from_path(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Format(_)));
    }
}

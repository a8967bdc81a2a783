//! Configuration options shared by all attention implementations.
//!
//! The [`Config`] struct captures run-time knobs such as dropout that callers
//! can tune without swapping implementations.

use super::AttentionError;

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Probability for dropout applied to attention weights during training.
    ///
    /// When `None`, dropout is disabled and the computation is deterministic.
    pub dropout_p: Option<f32>,
}

impl Default for Config {
    fn default() -> Self {
        Self { dropout_p: None }
    }
}

impl Config {
    /// Configuration for a training step; a zero probability disables dropout.
    pub fn training(dropout_p: f32) -> Self {
        Self {
            dropout_p: (dropout_p > 0.0).then_some(dropout_p),
        }
    }

    /// Configuration for evaluation, where dropout never applies.
    pub fn inference() -> Self {
        Self::default()
    }

    /// Checks the dropout probability lies in `[0, 1)`.
    pub fn validate(&self) -> Result<(), AttentionError> {
        match self.dropout_p {
            Some(p) if !(0.0..1.0).contains(&p) => Err(AttentionError::InvalidConfig {
                context: format!("dropout probability must be in [0, 1), got {p}"),
            }),
            _ => Ok(()),
        }
    }
}

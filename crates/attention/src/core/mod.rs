//! Core traits and types shared across attention implementations.
//!
//! Implementations operate on tensors with layout
//! `[batch, n_heads, seq_len, head_dim]`. The output tensor mirrors the query
//! layout, and reductions accumulate in `f32` regardless of the incoming dtype
//! (`bf16`, `f16`, or `f32`).

pub mod config;
pub mod errors;

use candle_core::Tensor;

pub use config::Config;
pub use errors::AttentionError;

/// Result of a single attention call.
#[derive(Debug, Clone)]
pub struct AttentionOutput {
    /// Attended values shaped `[batch, n_heads, q_len, head_dim]`, query dtype.
    pub output: Tensor,
    /// Attention probabilities shaped `[batch, n_heads, q_len, k_len]` in `f32`,
    /// after dropout when dropout is enabled.
    pub weights: Tensor,
}

/// Unified interface for attention kernels.
///
/// * `q` is `[batch, n_heads, q_len, head_dim]`; `k` and `v` are
///   `[batch, n_heads, k_len, head_dim]`.
/// * The returned output mirrors the layout and dtype of `q`.
/// * Masks, when present, must broadcast to `[batch, n_heads, q_len, k_len]`:
///   shaped `[batch|1, n_heads|1, q_len|1, k_len]`.
/// * Reductions are performed in `f32`; other dtypes are converted as needed.
/// * Dropout is controlled via [`Config::dropout_p`].
pub trait Attention {
    /// Compute scaled-dot-product attention with an optional additive mask.
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
    ) -> Result<AttentionOutput, AttentionError>;
}

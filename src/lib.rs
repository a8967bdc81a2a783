//! Context-aware attention on candle.
//!
//! [`ContextAwareAttention`] fuses an auxiliary context sequence into the keys
//! and values of a multi-head attention block through learned sigmoid gates,
//! then runs standard scaled-dot-product attention:
//!
//! ```text
//! key_context   = u_k(context)
//! value_context = u_v(context)
//! lambda_k      = sigmoid(w1_k(k) + w2_k(key_context))
//! lambda_v      = sigmoid(w1_v(v) + w2_v(value_context))
//! k_cap         = (1 - lambda_k) * k + lambda_k * key_context
//! v_cap         = (1 - lambda_v) * v + lambda_v * value_context
//! output        = MultiheadAttention(q, k_cap, v_cap)
//! ```
//!
//! Tensors are batch-first, `(batch, seq, features)`. The module never
//! mutates its inputs and is differentiable end to end when its parameters
//! come from a [`candle_nn::VarMap`]. Shape problems surface as ordinary
//! `candle_core::Error`s.
//!
//! ```no_run
//! use candle_core::{Device, Tensor};
//! use candle_nn::VarMap;
//! use context_attention::{ContextAttentionConfig, ContextAwareAttention};
//!
//! # fn main() -> candle_core::Result<()> {
//! let varmap = VarMap::new();
//! let module = ContextAwareAttention::from_varmap(&ContextAttentionConfig::new(8, 4), &varmap)?;
//! let x = Tensor::randn(0f32, 1.0, (2, 3, 8), &Device::Cpu)?;
//! let context = Tensor::randn(0f32, 1.0, (2, 3, 4), &Device::Cpu)?;
//! let out = module.forward(&x, &x, &x, &context, false)?;
//! assert_eq!(out.dims(), &[2, 3, 8]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context_attention;
pub mod device;

pub use attention::{masks, MultiheadAttention, MultiheadAttentionConfig};
pub use config::{ConfigError, ContextAttentionConfig, Precision};
pub use context_attention::{ContextAttentionOutput, ContextAwareAttention};
pub use device::DeviceSelection;
pub use layers::gate::{blend, fuse_key_value, ContextGate, GatedKeyValue};

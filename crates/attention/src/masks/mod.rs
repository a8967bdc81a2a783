//! Mask utilities shared by attention implementations.
//!
//! All masks produced here are additive tensors with dtype `f32` and rank 4 so
//! they broadcast against scores shaped `[batch, num_heads, q_len, k_len]`.
//! Values are either `0.0` (keep) or `f32::NEG_INFINITY` (discard). Builders
//! use singleton dimensions wherever the mask does not vary, so the same mask
//! serves any head count.

pub mod causal;
pub mod padding;

use candle_core::DType;

/// Dtype shared by all additive masks.
pub const MASK_DTYPE: DType = DType::F32;

pub use causal::causal_mask;
pub use padding::{key_padding_mask_from_booleans, key_padding_mask_from_lengths};

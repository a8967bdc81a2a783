//! Multi-head scaled-dot-product attention primitives.
//!
//! The crate exposes two layers of API. The [`Attention`] trait and its
//! [`ExactAttention`](reference::ExactAttention) implementation operate on
//! per-head tensors with layout `[batch, n_heads, seq_len, head_dim]` and
//! return both the attended values and the attention probabilities.
//! [`MultiheadAttention`] wraps a kernel with the packed input projection and
//! output projection of a standard transformer attention block, using the
//! batch-first layout `[batch, seq_len, embed_dim]`.
//!
//! Softmax reductions are performed in `f32` and outputs are cast back to the
//! query dtype. Dropout is a train-only concern: [`MultiheadAttention::forward`]
//! only enables it when called with `train = true`.
//!
//! Masks are additive `f32` tensors (`0.0` keep, `-inf` drop) built with the
//! helpers in [`masks`]. Attention is not causal unless a causal mask is
//! supplied.

pub mod core;
pub mod masks;
pub mod multihead;
pub mod reference;

pub use crate::core::{Attention, AttentionError, AttentionOutput, Config};
pub use multihead::{MultiheadAttention, MultiheadAttentionConfig};

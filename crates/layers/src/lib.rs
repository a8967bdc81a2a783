//! Building blocks for context-fused attention layers.
//!
//! [`gate`] hosts the sigmoid-gated blend that mixes a projected context
//! sequence into keys and values; [`checks`] provides the shape assertions
//! used by the modules composing it. [`linear`] runs projections under a
//! [`PrecisionPolicy`](dtypes::PrecisionPolicy) so `f16`/`bf16` parameters
//! multiply in `f32` and come back in their storage dtype. Everything here
//! works on candle tensors laid out `(batch, seq, hidden)` and returns
//! `candle_core::Result`.

pub mod checks;
pub mod dtypes;
pub mod gate;
pub mod linear;

pub use dtypes::PrecisionPolicy;
pub use gate::{blend, fuse_key_value, ContextGate, GatedKeyValue};

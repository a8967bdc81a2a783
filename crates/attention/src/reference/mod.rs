//! Portable, exact implementations of scaled-dot-product attention.
//!
//! These paths favour clarity over absolute performance and stay fully
//! differentiable, so gradients reach every projection feeding them.

pub mod exact;

pub use exact::ExactAttention;

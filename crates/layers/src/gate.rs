//! Sigmoid-gated blending of a projected context into keys and values.
//!
//! For a target sequence `x` (keys or values) and a context already projected
//! to the same width, a [`ContextGate`] scores every position with two
//! bias-free `hidden -> 1` maps and squashes the sum:
//!
//! ```text
//! lambda = sigmoid(w1(x) + w2(ctx))          // (batch, seq, 1)
//! fused  = (1 - lambda) * x + lambda * ctx   // (batch, seq, hidden)
//! ```
//!
//! `lambda` broadcasts across the feature dimension. A gate near 0 keeps the
//! original representation, near 1 replaces it with the context. The context
//! may have sequence length 1, in which case it is shared by every position.
//!
//! The functions here hold no state beyond the gate weights, so the blend can
//! be tested without any attention machinery.

use candle_core::{Result, Tensor};
use candle_nn::{Linear, VarBuilder};

use crate::dtypes::PrecisionPolicy;
use crate::linear;

/// Pair of scalar "compatibility" projections producing a blend gate.
#[derive(Debug, Clone)]
pub struct ContextGate {
    input_score: Linear,
    context_score: Linear,
    policy: PrecisionPolicy,
}

impl ContextGate {
    /// Allocate both projections; `input_vb` and `context_vb` name the weights
    /// scoring the target and the projected context respectively.
    pub fn new(hidden: usize, input_vb: VarBuilder, context_vb: VarBuilder) -> Result<Self> {
        let input_score = candle_nn::linear_no_bias(hidden, 1, input_vb)?;
        let context_score = candle_nn::linear_no_bias(hidden, 1, context_vb)?;
        Ok(Self::from_linears(input_score, context_score))
    }

    /// Build a gate from existing projections, each mapping `hidden -> 1`.
    ///
    /// The precision policy follows the dtype of `input_score`'s weight.
    pub fn from_linears(input_score: Linear, context_score: Linear) -> Self {
        let policy = linear::policy_for(&input_score);
        Self {
            input_score,
            context_score,
            policy,
        }
    }

    pub fn policy(&self) -> &PrecisionPolicy {
        &self.policy
    }

    /// Gate values in `(0, 1)`, shaped `(batch, seq, 1)`, in the storage dtype.
    ///
    /// Scores and the sigmoid are evaluated in the compute dtype.
    pub fn lambda(&self, x: &Tensor, projected_context: &Tensor) -> Result<Tensor> {
        let compute = PrecisionPolicy::new(self.policy.compute(), self.policy.compute());
        let scores = linear::forward(&self.input_score, x, &compute)?
            .broadcast_add(&linear::forward(&self.context_score, projected_context, &compute)?)?;
        self.policy
            .cast_to_storage(&candle_nn::ops::sigmoid(&scores)?)
    }

    /// Convenience for `blend(x, ctx, self.lambda(x, ctx))`, returning the
    /// fused tensor together with the gate.
    pub fn apply(&self, x: &Tensor, projected_context: &Tensor) -> Result<(Tensor, Tensor)> {
        let lambda = self.lambda(x, projected_context)?;
        let fused = blend(x, projected_context, &lambda)?;
        Ok((fused, lambda))
    }
}

/// Convex combination `(1 - lambda) * x + lambda * projected_context`.
///
/// A gate of exactly 0 returns `x` unchanged and a gate of exactly 1 returns
/// the context unchanged, bit for bit.
pub fn blend(x: &Tensor, projected_context: &Tensor, lambda: &Tensor) -> Result<Tensor> {
    let keep = lambda.affine(-1.0, 1.0)?;
    keep.broadcast_mul(x)?
        .broadcast_add(&lambda.broadcast_mul(projected_context)?)
}

/// Keys and values after context fusion, with the gates that produced them.
#[derive(Debug, Clone)]
pub struct GatedKeyValue {
    pub keys: Tensor,
    pub values: Tensor,
    pub key_gate: Tensor,
    pub value_gate: Tensor,
}

/// Fuse projected contexts into keys and values with independent gates.
pub fn fuse_key_value(
    keys: &Tensor,
    values: &Tensor,
    key_context: &Tensor,
    value_context: &Tensor,
    key_gate: &ContextGate,
    value_gate: &ContextGate,
) -> Result<GatedKeyValue> {
    let (keys, key_lambda) = key_gate.apply(keys, key_context)?;
    let (values, value_lambda) = value_gate.apply(values, value_context)?;
    Ok(GatedKeyValue {
        keys,
        values,
        key_gate: key_lambda,
        value_gate: value_lambda,
    })
}

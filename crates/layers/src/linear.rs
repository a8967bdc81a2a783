//! Mixed-precision affine projections.
//!
//! Inputs are `(batch, seq, in_dim)` and weights `(out_dim, in_dim)`, the
//! layout of `candle_nn::Linear`. Inputs, weights and bias are cast to
//! [`PrecisionPolicy::compute`] for the matmul and the result is cast back
//! with [`PrecisionPolicy::cast_to_storage`].

use candle_core::{Result, Tensor};
use candle_nn::Linear;

use crate::dtypes::PrecisionPolicy;

/// `hidden · weightᵀ + bias` under `policy`.
pub fn project(
    hidden: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
    policy: &PrecisionPolicy,
) -> Result<Tensor> {
    let input = policy.cast_for_matmul(hidden)?;
    let weight_t = policy.cast_for_matmul(weight)?.t()?;
    let mut output = input.broadcast_matmul(&weight_t)?;
    if let Some(bias) = bias {
        output = output.broadcast_add(&policy.cast_for_matmul(bias)?)?;
    }
    policy.cast_to_storage(&output)
}

/// Applies a `candle_nn::Linear` under `policy`.
pub fn forward(layer: &Linear, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
    project(hidden, layer.weight(), layer.bias(), policy)
}

/// Policy matching the dtype a layer's weight is stored in.
pub fn policy_for(layer: &Linear) -> PrecisionPolicy {
    PrecisionPolicy::from_parameter_dtype(layer.weight().dtype())
}

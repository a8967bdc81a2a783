//! Lightweight validation helpers shared across layer components.
//!
//! These routines provide concise shape assertions that can be wired into
//! constructors or forward paths. They return `candle_core::Result<()>` so call
//! sites can propagate errors without panicking.

use candle_core::{Error, Result, Tensor};

/// Ensures a tensor has exactly `rank` dimensions.
pub fn expect_rank(name: &str, tensor: &Tensor, rank: usize) -> Result<()> {
    let dims = tensor.dims();
    if dims.len() == rank {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{name}: expected rank {rank}, got shape {dims:?}"
        )))
    }
}

/// Validates the `(batch, seq, hidden)` convention with a known hidden size.
pub fn expect_batch_seq_hidden(name: &str, tensor: &Tensor, hidden: usize) -> Result<()> {
    match tensor.dims() {
        [_, _, actual] if *actual == hidden => Ok(()),
        dims => Err(Error::Msg(format!(
            "{name}: expected (batch, seq, {hidden}) layout, got {dims:?}"
        ))),
    }
}

/// Ensures two tensors agree on their leading (batch) dimension.
pub fn expect_same_batch(lhs_name: &str, lhs: &Tensor, rhs_name: &str, rhs: &Tensor) -> Result<()> {
    let lhs_batch = lhs.dim(0)?;
    let rhs_batch = rhs.dim(0)?;
    if lhs_batch == rhs_batch {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "batch mismatch: {lhs_name} has {lhs_batch}, {rhs_name} has {rhs_batch}"
        )))
    }
}

/// Ensures a context sequence can be blended position-wise into `target`.
///
/// The context must either match the target's sequence length or have length
/// one, in which case it broadcasts over every target position.
pub fn expect_seq_compatible(
    target_name: &str,
    target: &Tensor,
    context_name: &str,
    context: &Tensor,
) -> Result<()> {
    let target_seq = target.dim(1)?;
    let context_seq = context.dim(1)?;
    if context_seq == target_seq || context_seq == 1 {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context_name} sequence length {context_seq} must equal {target_name} sequence length {target_seq} or be 1"
        )))
    }
}

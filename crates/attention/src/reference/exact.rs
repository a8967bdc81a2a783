//! Reference attention kernel.
//!
//! The exact path prioritises numerical fidelity and mirrors the semantics
//! described by the [`Attention`](crate::core::Attention) trait. Every step is
//! built from differentiable candle ops so the kernel can sit inside a
//! training graph.

use std::sync::OnceLock;

use candle_core::{DType, Device, Tensor, D};
use candle_nn::ops::{dropout, softmax};

use crate::core::{Attention, AttentionError, AttentionOutput, Config};
use crate::masks::MASK_DTYPE;

/// Numerically stable, portable scaled-dot-product attention kernel.
#[derive(Debug, Default)]
pub struct ExactAttention {
    first_call: OnceLock<()>,
}

impl ExactAttention {
    /// Construct a reference attention kernel.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Attention for ExactAttention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
    ) -> Result<AttentionOutput, AttentionError> {
        config.validate()?;

        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::reference init device={:?} dtype={:?} dropout={:?} masked={}",
                q.device().location(),
                q.dtype(),
                config.dropout_p,
                mask.is_some()
            );
        }

        let device = q.device();
        if !device.same_device(k.device()) || !device.same_device(v.device()) {
            return Err(AttentionError::shape("q, k, v must reside on the same device"));
        }

        let dtype = q.dtype();
        if dtype != k.dtype() || dtype != v.dtype() {
            return Err(AttentionError::shape("q, k, v must share the same dtype"));
        }
        if !matches!(dtype, DType::F32 | DType::F16 | DType::BF16) {
            return Err(AttentionError::UnsupportedDType {
                requested: format!("{dtype:?}"),
            });
        }

        let (batch, heads, q_len, head_dim) = q
            .dims4()
            .map_err(|_| AttentionError::shape("q must have shape [batch, heads, seq_len, head_dim]"))?;
        let (kb, kh, k_len, kd) = k
            .dims4()
            .map_err(|_| AttentionError::shape("k must have shape [batch, heads, seq_len, head_dim]"))?;
        let (vb, vh, vk, vd) = v
            .dims4()
            .map_err(|_| AttentionError::shape("v must have shape [batch, heads, seq_len, head_dim]"))?;

        if kb != batch || kh != heads || kd != head_dim {
            return Err(AttentionError::shape(format!(
                "k shape mismatch: expected [{batch}, {heads}, ?, {head_dim}] got [{kb}, {kh}, {k_len}, {kd}]"
            )));
        }
        if vb != batch || vh != heads || vk != k_len || vd != head_dim {
            return Err(AttentionError::shape(format!(
                "v shape mismatch: expected [{batch}, {heads}, {k_len}, {head_dim}] got [{vb}, {vh}, {vk}, {vd}]"
            )));
        }

        let q_work = q.to_dtype(DType::F32)?;
        let k_work = k.to_dtype(DType::F32)?;
        let v_work = v.to_dtype(DType::F32)?;

        let merged = batch * heads;
        let q_view = q_work.reshape((merged, q_len, head_dim))?;
        let k_t = k_work.reshape((merged, k_len, head_dim))?.transpose(1, 2)?;
        let scale = 1.0 / (head_dim as f64).sqrt();
        let mut scores = q_view
            .matmul(&k_t)?
            .affine(scale, 0.0)?
            .reshape((batch, heads, q_len, k_len))?;

        if let Some(mask) = mask {
            validate_mask(mask, device, batch, heads, q_len, k_len)?;
            scores = scores.broadcast_add(mask)?;
        }

        let probs = softmax(&scores, D::Minus1)?;
        let attended = match config.dropout_p {
            Some(p) if p > 0.0 => dropout(&probs, p)?,
            _ => probs,
        };

        let output = attended
            .reshape((merged, q_len, k_len))?
            .matmul(&v_work.reshape((merged, k_len, head_dim))?)?
            .reshape((batch, heads, q_len, head_dim))?
            .to_dtype(dtype)?;

        Ok(AttentionOutput {
            output,
            weights: attended,
        })
    }
}

fn validate_mask(
    mask: &Tensor,
    device: &Device,
    batch: usize,
    heads: usize,
    q_len: usize,
    k_len: usize,
) -> Result<(), AttentionError> {
    if !device.same_device(mask.device()) {
        return Err(AttentionError::shape("mask must reside on the same device as q"));
    }
    if mask.dtype() != MASK_DTYPE {
        return Err(AttentionError::UnsupportedDType {
            requested: format!("mask expects dtype {MASK_DTYPE:?}, got {:?}", mask.dtype()),
        });
    }
    let (mb, mh, mq, mk) = mask.dims4().map_err(|_| {
        AttentionError::shape("mask must have shape [batch|1, heads|1, q_len|1, k_len]")
    })?;
    let fits = |actual: usize, full: usize| actual == 1 || actual == full;
    if !fits(mb, batch) || !fits(mh, heads) || !fits(mq, q_len) || mk != k_len {
        return Err(AttentionError::shape(format!(
            "mask shape mismatch: expected [{batch}|1, {heads}|1, {q_len}|1, {k_len}] got [{mb}, {mh}, {mq}, {mk}]"
        )));
    }
    Ok(())
}

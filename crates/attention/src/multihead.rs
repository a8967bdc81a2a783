//! Batch-first multi-head attention block.
//!
//! Inputs are `[batch, seq_len, embed_dim]`. Query, key and value are
//! projected by a single packed weight `in_proj_weight` of shape
//! `(3 * embed_dim, embed_dim)`, split into `num_heads` heads, attended with
//! [`ExactAttention`], merged and passed through `out_proj`. Parameter names
//! follow the conventional packed layout (`in_proj_weight`, `in_proj_bias`,
//! `out_proj.weight`, `out_proj.bias`) so exported checkpoints load by name.

use candle_core::{Error, Result, Tensor};
use candle_nn::{init, Init, Linear, VarBuilder};
use layers::{linear, PrecisionPolicy};

use crate::core::{Attention, AttentionOutput, Config};
use crate::reference::ExactAttention;

/// Structural configuration of a [`MultiheadAttention`] block.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiheadAttentionConfig {
    /// Width of the query, key and value vectors.
    pub embed_dim: usize,
    /// Number of parallel heads; must divide `embed_dim`.
    pub num_heads: usize,
    /// Dropout probability on attention weights, applied only while training.
    pub dropout: f32,
    /// Whether the input and output projections carry bias vectors.
    pub bias: bool,
    /// Appends an all-zero key and value row after projection.
    pub add_zero_attn: bool,
}

impl MultiheadAttentionConfig {
    /// Single-purpose constructor with bias enabled and no dropout.
    pub fn new(embed_dim: usize, num_heads: usize) -> Self {
        Self {
            embed_dim,
            num_heads,
            dropout: 0.0,
            bias: true,
            add_zero_attn: false,
        }
    }

    pub fn head_dim(&self) -> usize {
        self.embed_dim / self.num_heads.max(1)
    }

    /// Validate structural invariants before any parameter is allocated.
    pub fn validate(&self) -> Result<()> {
        if self.embed_dim == 0 {
            return Err(Error::Msg("embed_dim must be greater than zero".into()));
        }
        if self.num_heads == 0 {
            return Err(Error::Msg("num_heads must be greater than zero".into()));
        }
        if self.embed_dim % self.num_heads != 0 {
            return Err(Error::Msg(format!(
                "embed_dim ({}) must be divisible by num_heads ({})",
                self.embed_dim, self.num_heads
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::Msg("dropout must be in [0, 1)".into()));
        }
        Ok(())
    }
}

/// Multi-head scaled-dot-product attention with packed input projections.
#[derive(Debug)]
pub struct MultiheadAttention {
    config: MultiheadAttentionConfig,
    in_proj_weight: Tensor,
    in_proj_bias: Option<Tensor>,
    out_proj: Linear,
    policy: PrecisionPolicy,
    kernel: ExactAttention,
}

impl MultiheadAttention {
    /// Allocate parameters through `vb`.
    ///
    /// `in_proj_weight` uses Xavier-uniform initialisation, biases start at
    /// zero and `out_proj.weight` uses Kaiming-uniform.
    pub fn new(config: MultiheadAttentionConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let embed = config.embed_dim;

        let bound = (6.0 / (embed + 3 * embed) as f64).sqrt();
        let in_proj_weight = vb.get_with_hints(
            (3 * embed, embed),
            "in_proj_weight",
            Init::Uniform {
                lo: -bound,
                up: bound,
            },
        )?;
        let in_proj_bias = if config.bias {
            Some(vb.get_with_hints(3 * embed, "in_proj_bias", Init::Const(0.0))?)
        } else {
            None
        };

        let out_vb = vb.pp("out_proj");
        let out_weight =
            out_vb.get_with_hints((embed, embed), "weight", init::DEFAULT_KAIMING_UNIFORM)?;
        let out_bias = if config.bias {
            Some(out_vb.get_with_hints(embed, "bias", Init::Const(0.0))?)
        } else {
            None
        };

        let policy = PrecisionPolicy::from_parameter_dtype(in_proj_weight.dtype());
        Ok(Self {
            config,
            in_proj_weight,
            in_proj_bias,
            policy,
            out_proj: Linear::new(out_weight, out_bias),
            kernel: ExactAttention::new(),
        })
    }

    pub fn config(&self) -> &MultiheadAttentionConfig {
        &self.config
    }

    /// Attend `query` over `key`/`value`.
    ///
    /// * `query`: `[batch, q_len, embed_dim]`
    /// * `key`, `value`: `[batch, k_len, embed_dim]`
    /// * `mask`: optional additive mask broadcastable to
    ///   `[batch, num_heads, q_len, k_len]`
    ///
    /// Returns the output `[batch, q_len, embed_dim]` and the attention
    /// weights averaged over heads, `[batch, q_len, k_len]` (one extra key
    /// column when `add_zero_attn` is set). In training mode the weights are
    /// the ones the values were mixed with, after dropout.
    pub fn forward(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let embed = self.config.embed_dim;
        let (batch, q_len, q_dim) = query.dims3()?;
        let (kb, k_len, k_dim) = key.dims3()?;
        let (vb, v_len, v_dim) = value.dims3()?;
        if q_dim != embed || k_dim != embed || v_dim != embed {
            return Err(Error::Msg(format!(
                "query/key/value must end in embed_dim {embed}, got {q_dim}/{k_dim}/{v_dim}"
            )));
        }
        if kb != batch || vb != batch {
            return Err(Error::Msg(format!(
                "batch mismatch: query {batch}, key {kb}, value {vb}"
            )));
        }
        if v_len != k_len {
            return Err(Error::Msg(format!(
                "key and value sequence lengths differ: {k_len} vs {v_len}"
            )));
        }

        let q = self.split_heads(&self.project(query, 0)?)?;
        let mut k = self.split_heads(&self.project(key, 1)?)?;
        let mut v = self.split_heads(&self.project(value, 2)?)?;
        let mut mask = mask.cloned();
        if self.config.add_zero_attn {
            k = k.pad_with_zeros(2, 0, 1)?;
            v = v.pad_with_zeros(2, 0, 1)?;
            mask = mask.map(|m| m.pad_with_zeros(3, 0, 1)).transpose()?;
        }

        let config = if train {
            Config::training(self.config.dropout)
        } else {
            Config::inference()
        };
        let AttentionOutput { output, weights } =
            self.kernel.attend(&q, &k, &v, mask.as_ref(), &config)?;

        log::debug!(
            "multihead attention batch={batch} q_len={q_len} k_len={k_len} heads={} train={train}",
            self.config.num_heads
        );

        let merged = output.transpose(1, 2)?.reshape((batch, q_len, embed))?;
        let output = linear::forward(&self.out_proj, &merged, &self.policy)?;
        Ok((output, weights.mean(1)?))
    }

    /// Applies the `index`-th slice (0 = query, 1 = key, 2 = value) of the
    /// packed input projection.
    fn project(&self, input: &Tensor, index: usize) -> Result<Tensor> {
        let embed = self.config.embed_dim;
        let weight = self.in_proj_weight.narrow(0, index * embed, embed)?;
        let bias = self
            .in_proj_bias
            .as_ref()
            .map(|bias| bias.narrow(0, index * embed, embed))
            .transpose()?;
        linear::project(input, &weight, bias.as_ref(), &self.policy)
    }

    /// `[batch, seq, embed]` -> `[batch, heads, seq, head_dim]`.
    fn split_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (batch, seq, _) = x.dims3()?;
        x.reshape((batch, seq, self.config.num_heads, self.config.head_dim()))?
            .transpose(1, 2)?
            .contiguous()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masks::key_padding_mask_from_lengths;
    use candle_core::{DType, Device, D};
    use candle_nn::VarMap;
    use std::collections::HashMap;

    fn inputs(device: &Device, batch: usize, seq: usize, dim: usize) -> Result<Tensor> {
        Tensor::randn(0f32, 1.0, (batch, seq, dim), device)
    }

    fn identity_block(embed: usize, device: &Device) -> Result<MultiheadAttention> {
        let eye = Tensor::eye(embed, DType::F32, device)?;
        let mut tensors = HashMap::new();
        tensors.insert(
            "in_proj_weight".to_string(),
            Tensor::cat(&[&eye, &eye, &eye], 0)?,
        );
        tensors.insert(
            "in_proj_bias".to_string(),
            Tensor::zeros(3 * embed, DType::F32, device)?,
        );
        tensors.insert("out_proj.weight".to_string(), eye);
        tensors.insert(
            "out_proj.bias".to_string(),
            Tensor::zeros(embed, DType::F32, device)?,
        );
        let vb = VarBuilder::from_tensors(tensors, DType::F32, device);
        MultiheadAttention::new(MultiheadAttentionConfig::new(embed, 1), vb)
    }

    #[test]
    fn forward_preserves_batch_first_shapes() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let mha = MultiheadAttention::new(MultiheadAttentionConfig::new(16, 4), vb)?;

        let q = inputs(&device, 2, 3, 16)?;
        let kv = inputs(&device, 2, 5, 16)?;
        let (output, weights) = mha.forward(&q, &kv, &kv, None, false)?;

        assert_eq!(output.dims3()?, (2, 3, 16));
        assert_eq!(weights.dims3()?, (2, 3, 5));
        Ok(())
    }

    #[test]
    fn registers_packed_parameter_names() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let _mha = MultiheadAttention::new(MultiheadAttentionConfig::new(8, 2), vb)?;

        let data = varmap.data().lock().unwrap();
        assert_eq!(data["in_proj_weight"].dims(), &[24, 8]);
        assert_eq!(data["in_proj_bias"].dims(), &[24]);
        assert_eq!(data["out_proj.weight"].dims(), &[8, 8]);
        assert_eq!(data["out_proj.bias"].dims(), &[8]);
        Ok(())
    }

    #[test]
    fn bias_free_block_has_no_bias_parameters() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let mut config = MultiheadAttentionConfig::new(8, 1);
        config.bias = false;
        let mha = MultiheadAttention::new(config, vb)?;

        assert_eq!(varmap.all_vars().len(), 2);
        let x = inputs(&device, 1, 2, 8)?;
        let (output, _) = mha.forward(&x, &x, &x, None, false)?;
        assert_eq!(output.dims3()?, (1, 2, 8));
        Ok(())
    }

    #[test]
    fn identity_projections_reduce_to_plain_attention() -> Result<()> {
        let device = Device::Cpu;
        let embed = 4;
        let mha = identity_block(embed, &device)?;

        let q = inputs(&device, 1, 2, embed)?;
        let k = inputs(&device, 1, 3, embed)?;
        let v = inputs(&device, 1, 3, embed)?;
        let (output, weights) = mha.forward(&q, &k, &v, None, false)?;

        let scores = q
            .matmul(&k.t()?)?
            .affine(1.0 / (embed as f64).sqrt(), 0.0)?;
        let expected_weights = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let expected = expected_weights.matmul(&v)?;

        let diff = output.sub(&expected)?.abs()?.flatten_all()?.max(0)?;
        assert!(diff.to_vec0::<f32>()? < 1e-5);
        let diff = weights.sub(&expected_weights)?.abs()?.flatten_all()?.max(0)?;
        assert!(diff.to_vec0::<f32>()? < 1e-5);
        Ok(())
    }

    #[test]
    fn add_zero_attn_appends_a_key() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let mut config = MultiheadAttentionConfig::new(8, 2);
        config.add_zero_attn = true;
        let mha = MultiheadAttention::new(config, vb)?;

        let q = inputs(&device, 2, 3, 8)?;
        let kv = inputs(&device, 2, 4, 8)?;
        let mask = key_padding_mask_from_lengths(&device, &[4, 2], 4)?;
        let (output, weights) = mha.forward(&q, &kv, &kv, Some(&mask), false)?;

        assert_eq!(output.dims3()?, (2, 3, 8));
        assert_eq!(weights.dims3()?, (2, 3, 5));
        // The appended zero key is never masked.
        let zero_key = weights.narrow(2, 4, 1)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(zero_key.iter().all(|w| *w > 0.0));
        Ok(())
    }

    #[test]
    fn key_padding_hides_padded_positions() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let mha = MultiheadAttention::new(MultiheadAttentionConfig::new(8, 2), vb)?;

        let q = inputs(&device, 2, 3, 8)?;
        let kv = inputs(&device, 2, 4, 8)?;
        let mask = key_padding_mask_from_lengths(&device, &[4, 2], 4)?;
        let (_, weights) = mha.forward(&q, &kv, &kv, Some(&mask), false)?;

        let padded = weights.get(1)?.narrow(1, 2, 2)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(padded.iter().all(|w| *w == 0.0));
        Ok(())
    }

    #[test]
    fn mismatched_embed_dim_is_rejected() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let mha = MultiheadAttention::new(MultiheadAttentionConfig::new(8, 1), vb)?;

        let q = inputs(&device, 1, 2, 8)?;
        let k = inputs(&device, 1, 2, 6)?;
        assert!(mha.forward(&q, &k, &q, None, false).is_err());
        Ok(())
    }

    #[test]
    fn invalid_configs_fail_validation() {
        assert!(MultiheadAttentionConfig::new(0, 1).validate().is_err());
        assert!(MultiheadAttentionConfig::new(8, 0).validate().is_err());
        assert!(MultiheadAttentionConfig::new(10, 3).validate().is_err());
        let mut config = MultiheadAttentionConfig::new(8, 2);
        config.dropout = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn eval_mode_is_deterministic_with_dropout() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let mut config = MultiheadAttentionConfig::new(8, 2);
        config.dropout = 0.5;
        let mha = MultiheadAttention::new(config, vb)?;

        let x = inputs(&device, 1, 4, 8)?;
        let (first, _) = mha.forward(&x, &x, &x, None, false)?;
        let (second, _) = mha.forward(&x, &x, &x, None, false)?;
        assert_eq!(
            first.flatten_all()?.to_vec1::<f32>()?,
            second.flatten_all()?.to_vec1::<f32>()?
        );

        let (trained, _) = mha.forward(&x, &x, &x, None, true)?;
        assert_eq!(trained.dims3()?, (1, 4, 8));
        assert_ne!(
            trained.flatten_all()?.to_vec1::<f32>()?,
            first.flatten_all()?.to_vec1::<f32>()?
        );
        Ok(())
    }

    #[test]
    fn bf16_parameters_run_on_cpu() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::BF16, &device);
        let mha = MultiheadAttention::new(MultiheadAttentionConfig::new(8, 2), vb)?;

        let x = inputs(&device, 2, 3, 8)?.to_dtype(DType::BF16)?;
        let (output, weights) = mha.forward(&x, &x, &x, None, false)?;
        assert_eq!(output.dtype(), DType::BF16);
        assert_eq!(output.dims3()?, (2, 3, 8));
        assert_eq!(weights.dtype(), DType::F32);
        Ok(())
    }
}

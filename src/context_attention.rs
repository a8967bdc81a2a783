use std::fmt;
use std::sync::OnceLock;

use attention::MultiheadAttention;
use candle_core::{Device, Error, Result, Tensor};
use candle_nn::{Linear, VarBuilder, VarMap};
use layers::{checks, fuse_key_value, linear, ContextGate, GatedKeyValue, PrecisionPolicy};

use crate::config::ContextAttentionConfig;

/// Everything produced by one forward pass.
#[derive(Debug, Clone)]
pub struct ContextAttentionOutput {
    /// Attention output, `(batch, seq_q, dim_model)`.
    pub output: Tensor,
    /// Attention weights averaged over heads, `(batch, seq_q, seq_k)`, `f32`,
    /// after dropout when `train` is set.
    pub attention_weights: Tensor,
    /// Key-side gate, `(batch, seq_k, 1)`.
    pub key_gate: Tensor,
    /// Value-side gate, `(batch, seq_k, 1)`.
    pub value_gate: Tensor,
}

/// Multi-head attention whose keys and values are blended with a projected
/// context sequence before attending.
///
/// Parameters are registered under `u_k`, `u_v`, `w1_k`, `w2_k`, `w1_v`,
/// `w2_v` and `attention_layer`, so a `VarMap` saved from this module loads
/// back by name.
pub struct ContextAwareAttention {
    config: ContextAttentionConfig,
    device: Device,
    attention_layer: MultiheadAttention,
    u_k: Linear,
    u_v: Linear,
    key_gate: ContextGate,
    value_gate: ContextGate,
    policy: PrecisionPolicy,
    first_call: OnceLock<()>,
}

impl fmt::Debug for ContextAwareAttention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextAwareAttention")
            .field("dim_model", &self.config.dim_model)
            .field("dim_context", &self.config.dim_context)
            .field("num_heads", &self.config.num_heads)
            .field("dropout_rate", &self.config.dropout_rate)
            .field("device", &self.device.location())
            .field("dtype", &self.policy.storage())
            .finish()
    }
}

impl ContextAwareAttention {
    /// Build the module with parameters allocated through `vb`.
    ///
    /// The module lives on `vb`'s device for its whole lifetime.
    pub fn new(config: &ContextAttentionConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;

        let attention_layer =
            MultiheadAttention::new(config.attention_config(), vb.pp("attention_layer"))?;

        let u_k = candle_nn::linear_no_bias(config.dim_context, config.dim_model, vb.pp("u_k"))?;
        let key_gate = ContextGate::new(config.dim_model, vb.pp("w1_k"), vb.pp("w2_k"))?;

        let u_v = candle_nn::linear_no_bias(config.dim_context, config.dim_model, vb.pp("u_v"))?;
        let value_gate = ContextGate::new(config.dim_model, vb.pp("w1_v"), vb.pp("w2_v"))?;

        Ok(Self {
            config: config.clone(),
            device: vb.device().clone(),
            attention_layer,
            u_k,
            u_v,
            key_gate,
            value_gate,
            policy: PrecisionPolicy::from_parameter_dtype(vb.dtype()),
            first_call: OnceLock::new(),
        })
    }

    /// Resolve the configured device and precision and register fresh
    /// trainable parameters in `varmap`.
    pub fn from_varmap(config: &ContextAttentionConfig, varmap: &VarMap) -> Result<Self> {
        let device = config.device.resolve()?;
        let vb = VarBuilder::from_varmap(varmap, config.precision.dtype(), &device);
        Self::new(config, vb)
    }

    pub fn config(&self) -> &ContextAttentionConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dim_model(&self) -> usize {
        self.config.dim_model
    }

    pub fn dim_context(&self) -> usize {
        self.config.dim_context
    }

    /// Attend `q` over context-fused keys and values.
    ///
    /// * `q`: `(batch, seq_q, dim_model)`
    /// * `k`: `(batch, seq_k, ...)`, trailing dims flattened to `dim_model`
    /// * `v`: `(batch, seq_k, dim_model)`
    /// * `context`: `(batch, seq_k or 1, dim_context)`
    ///
    /// Attention dropout is active only when `train` is set.
    pub fn forward(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        context: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        Ok(self
            .forward_with_details(q, k, v, context, None, train)?
            .output)
    }

    /// Like [`forward`](Self::forward) but also returns attention weights and
    /// both gates, and accepts an additive attention mask broadcastable to
    /// `(batch, num_heads, seq_q, seq_k)` (see [`attention::masks`]).
    pub fn forward_with_details(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        context: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<ContextAttentionOutput> {
        if self.first_call.set(()).is_ok() {
            log::info!(
                "context_attention init dim_model={} dim_context={} heads={} dropout={} device={:?}",
                self.config.dim_model,
                self.config.dim_context,
                self.config.num_heads,
                self.config.dropout_rate,
                self.device.location()
            );
        }

        let k = flatten_key(k)?;
        checks::expect_batch_seq_hidden("context", context, self.config.dim_context)?;
        checks::expect_same_batch("key", &k, "context", context)?;
        checks::expect_seq_compatible("key", &k, "context", context)?;
        checks::expect_rank("value", v, 3)?;
        checks::expect_same_batch("value", v, "context", context)?;
        checks::expect_seq_compatible("value", v, "context", context)?;

        let key_context = linear::forward(&self.u_k, context, &self.policy)?;
        let value_context = linear::forward(&self.u_v, context, &self.policy)?;

        let GatedKeyValue {
            keys,
            values,
            key_gate,
            value_gate,
        } = fuse_key_value(
            &k,
            v,
            &key_context,
            &value_context,
            &self.key_gate,
            &self.value_gate,
        )?;

        log::debug!(
            "context_attention forward q={:?} k={:?} context={:?} train={train}",
            q.dims(),
            k.dims(),
            context.dims()
        );

        let (output, attention_weights) =
            self.attention_layer
                .forward(q, &keys, &values, mask, train)?;

        Ok(ContextAttentionOutput {
            output,
            attention_weights,
            key_gate,
            value_gate,
        })
    }
}

/// Reshape `k` to `(batch, seq, -1)`.
fn flatten_key(k: &Tensor) -> Result<Tensor> {
    match k.dims() {
        [batch, seq, ..] => k.reshape((*batch, *seq, ())),
        dims => Err(Error::Msg(format!(
            "key must have at least (batch, seq) dims, got {dims:?}"
        ))),
    }
}

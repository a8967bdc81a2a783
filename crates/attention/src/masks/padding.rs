//! Builders for key padding masks used to drop padded keys.
//!
//! Padding masks are shaped `[batch, 1, 1, k_len]`: the same keys are hidden
//! from every head and every query of a batch element.

use candle_core::{Device, Error, Result, Tensor};

/// Construct padding masks from per-batch valid key lengths.
///
/// Lengths larger than `k_len` are clamped, so nothing is masked for them.
pub fn key_padding_mask_from_lengths(
    device: &Device,
    key_lengths: &[usize],
    k_len: usize,
) -> Result<Tensor> {
    let data: Vec<f32> = key_lengths
        .iter()
        .flat_map(|&valid| {
            let valid = valid.min(k_len);
            (0..k_len).map(move |k| if k < valid { 0.0 } else { f32::NEG_INFINITY })
        })
        .collect();

    Tensor::from_vec(data, (key_lengths.len(), 1, 1, k_len), device)
}

/// Construct padding masks from boolean padding indicators.
///
/// Each inner slice corresponds to a batch element and must share the same
/// length. `true` indicates a padded (masked) key position.
pub fn key_padding_mask_from_booleans(device: &Device, padding: &[Vec<bool>]) -> Result<Tensor> {
    let k_len = padding.first().map(Vec::len).unwrap_or(0);
    if let Some(bad) = padding.iter().find(|row| row.len() != k_len) {
        return Err(Error::Msg(format!(
            "all boolean padding masks must share k_len {k_len}, found {}",
            bad.len()
        )));
    }

    let data: Vec<f32> = padding
        .iter()
        .flatten()
        .map(|&is_padding| if is_padding { f32::NEG_INFINITY } else { 0.0 })
        .collect();

    Tensor::from_vec(data, (padding.len(), 1, 1, k_len), device)
}

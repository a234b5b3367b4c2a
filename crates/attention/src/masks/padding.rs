//! Builders for padding masks used to drop padded keys.

use candle_core::{Device, Error, Result, Tensor};

/// Construct padding masks from per-batch valid key lengths.
///
/// Keys at or beyond `key_lengths[b]` are masked for every query of batch `b`.
pub fn padding_mask_from_lengths(
    device: &Device,
    key_lengths: &[usize],
    q_len: usize,
    k_len: usize,
) -> Result<Tensor> {
    let batch = key_lengths.len();
    let mut data = vec![0u8; batch * q_len * k_len];

    for (b, &valid) in key_lengths.iter().enumerate() {
        let valid = valid.min(k_len);
        for q in 0..q_len {
            let row_start = (b * q_len + q) * k_len;
            data[row_start..row_start + valid].fill(1);
        }
    }

    Tensor::from_vec(data, (batch, q_len, k_len), device)
}

/// Construct padding masks from boolean padding indicators.
///
/// Each inner slice corresponds to a batch element and all must share the same
/// length. `true` marks a padded (masked) key position.
pub fn padding_mask_from_booleans(
    device: &Device,
    padding: &[Vec<bool>],
    q_len: usize,
) -> Result<Tensor> {
    let k_len = padding.first().map(Vec::len).unwrap_or(0);
    if let Some(bad) = padding.iter().find(|row| row.len() != k_len) {
        return Err(Error::Msg(format!(
            "all boolean padding masks must share k_len {k_len}, found {}",
            bad.len()
        )));
    }

    let mut data = Vec::with_capacity(padding.len() * q_len * k_len);
    for row in padding {
        let keep: Vec<u8> = row.iter().map(|&is_padding| u8::from(!is_padding)).collect();
        for _ in 0..q_len {
            data.extend_from_slice(&keep);
        }
    }

    Tensor::from_vec(data, (padding.len(), q_len, k_len), device)
}

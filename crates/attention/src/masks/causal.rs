//! Builders for causal keep-masks.

use candle_core::{Device, Result, Tensor};

/// Construct a causal mask for the supplied sequence dimensions.
///
/// When `k_len > q_len`, queries are assumed to align with the most recent
/// `q_len` keys, allowing access to the extended prefix.
pub fn causal_mask(device: &Device, batch: usize, q_len: usize, k_len: usize) -> Result<Tensor> {
    let offset = k_len.saturating_sub(q_len);
    let mut row_pattern = vec![0u8; q_len * k_len];
    for q in 0..q_len {
        let visible = (q + offset + 1).min(k_len);
        row_pattern[q * k_len..q * k_len + visible].fill(1);
    }
    let data = row_pattern.repeat(batch);
    Tensor::from_vec(data, (batch, q_len, k_len), device)
}

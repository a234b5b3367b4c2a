//! Core traits and types shared across attention implementations.
//!
//! Kernels operate on tensors with layout `[batch, n_heads, seq_len, head_dim]`.
//! The output tensor mirrors the query layout and dtype; reductions accumulate
//! in `f32` unless [`ScorePrecision::Inherit`] is selected.

pub mod config;
pub mod errors;

use candle_core::Tensor;

pub use config::{Config, MaskedRowPolicy, ScorePrecision};
pub use errors::{AttentionError, ConfigError, Result};

/// Unified interface for attention kernels.
///
/// * `q` is `[batch, n_heads, q_len, head_dim]`; `k` and `v` are
///   `[batch, n_heads, k_len, head_dim]`.
/// * The returned tensor is `[batch, n_heads, q_len, head_dim]` in the dtype of `q`.
/// * Masks, when present, are binary keep-masks shaped
///   `[batch, 1 or n_heads, q_len, k_len]`; non-zero entries are attendable.
/// * Dropout is controlled via [`Config::dropout_p`] and only applied when
///   `training` is set.
pub trait Attention {
    /// Compute scaled dot-product attention with an optional keep-mask.
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
        training: bool,
    ) -> Result<Tensor>;
}

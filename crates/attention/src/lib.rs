//! Multi-head scaled dot-product attention on Candle tensors.
//!
//! The crate is organised bottom-up:
//!
//! * [`core`] holds the kernel configuration, the error type and the
//!   [`Attention`] trait implemented by kernels operating on
//!   `[batch, n_heads, seq_len, head_dim]` tensors.
//! * [`masks`] builds and normalises binary keep-masks shaped
//!   `[batch, q_len, k_len]`.
//! * [`heads`] converts between sequence and per-head layouts.
//! * [`reference`] provides [`ExactAttention`], the scaled, masked, softmax
//!   kernel.
//! * [`block`] wires four projections around the kernel into
//!   [`ScaledDotProductAttentionBlock`].
//!
//! Dropout is an optional, train-only concern controlled via the block
//! configuration. With a dropout probability of zero, or outside training,
//! forward passes are deterministic.

pub mod block;
pub mod core;
pub mod heads;
pub mod masks;
pub mod reference;

pub use crate::block::{
    AttentionOutput, BlockBuilder, BlockConfig, Projection, ScaledDotProductAttentionBlock,
};
pub use crate::core::{
    Attention, AttentionError, Config, ConfigError, MaskedRowPolicy, ScorePrecision,
};
pub use crate::reference::ExactAttention;

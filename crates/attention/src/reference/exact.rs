//! Exact scaled dot-product attention.
//!
//! The exact path prioritises numerical fidelity and mirrors the semantics
//! described by the [`Attention`](crate::core::Attention) trait: scores are
//! scaled by `1 / sqrt(head_dim)` before masking, masked scores are replaced by
//! a large negative sentinel, and the softmax subtracts the row maximum.

use std::sync::OnceLock;

use candle_core::{DType, Tensor, D};
use candle_nn::ops::{dropout, softmax_last_dim};
use layers::PrecisionPolicy;

use crate::core::{
    Attention, AttentionError, Config, MaskedRowPolicy, Result, ScorePrecision,
};
use crate::masks::keep_mask;

/// Score written into masked positions before the softmax.
///
/// Scores are always computed in `f32` or `f64`, so the sentinel never
/// overflows to `-inf`.
pub const MASK_FILL: f64 = -1e9;

const SUPPORTED_DTYPES: [DType; 4] = [DType::F32, DType::F16, DType::BF16, DType::F64];

/// Numerically stable, portable attention kernel.
#[derive(Debug, Default)]
pub struct ExactAttention {
    first_call: OnceLock<()>,
}

impl ExactAttention {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes attention and also returns the attention probabilities.
    ///
    /// The probabilities are shaped `[batch, heads, q_len, k_len]`, are taken
    /// after masking and before dropout, and stay in the compute dtype.
    pub fn attend_with_probabilities(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
        training: bool,
    ) -> Result<(Tensor, Tensor)> {
        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::reference init precision={:?} masked_rows={:?} dropout={:?}",
                config.precision,
                config.masked_rows,
                config.dropout_p
            );
        }

        let device = q.device();
        if !device.same_device(k.device()) || !device.same_device(v.device()) {
            return Err(AttentionError::shape(
                "q, k, v must reside on the same device",
            ));
        }

        let dtype = q.dtype();
        if dtype != k.dtype() || dtype != v.dtype() {
            return Err(AttentionError::shape("q, k, v must share the same dtype"));
        }
        if !SUPPORTED_DTYPES.contains(&dtype) {
            return Err(AttentionError::UnsupportedDType {
                requested: format!("{dtype:?}"),
            });
        }

        let (batch, heads, q_len, head_dim) = q.dims4().map_err(|_| {
            AttentionError::shape("q must have shape [batch, heads, seq_len, head_dim]")
        })?;
        let (kb, kh, k_len, kd) = k.dims4().map_err(|_| {
            AttentionError::shape("k must have shape [batch, heads, seq_len, head_dim]")
        })?;
        let (vb, vh, vk, vd) = v.dims4().map_err(|_| {
            AttentionError::shape("v must have shape [batch, heads, seq_len, head_dim]")
        })?;

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

        // bf16 has no CPU matmul, so half types still promote under `Inherit`
        let work_dtype = match config.precision {
            ScorePrecision::ForceF32 => DType::F32,
            ScorePrecision::Inherit => PrecisionPolicy::from_parameter_dtype(dtype).compute(),
        };
        let q_work = q.to_dtype(work_dtype)?.contiguous()?;
        let k_work = k.to_dtype(work_dtype)?.contiguous()?;
        let v_work = v.to_dtype(work_dtype)?.contiguous()?;

        let merged = batch * heads;
        let q_view = q_work.reshape((merged, q_len, head_dim))?;
        let k_t = k_work.reshape((merged, k_len, head_dim))?.transpose(1, 2)?;
        let scale = 1.0 / (head_dim as f64).sqrt();
        let mut scores = q_view
            .matmul(&k_t)?
            .affine(scale, 0.0)?
            .reshape((batch, heads, q_len, k_len))?;

        let keep = match mask {
            Some(mask) => Some(self.prepare_mask(mask, (batch, heads, q_len, k_len), q)?),
            None => None,
        };

        if let Some(keep) = &keep {
            let fill = Tensor::new(MASK_FILL, device)?
                .to_dtype(work_dtype)?
                .broadcast_as(scores.shape())?;
            scores = keep
                .broadcast_as(scores.shape())?
                .where_cond(&scores, &fill)?;
        }

        let mut probs = softmax_last_dim(&scores)?;

        if let (Some(keep), MaskedRowPolicy::ZeroFill) = (&keep, config.masked_rows) {
            let row_has_keys = keep
                .to_dtype(DType::F32)?
                .max_keepdim(D::Minus1)?
                .ne(0f32)?
                .broadcast_as(probs.shape())?;
            let zeros = Tensor::zeros((), work_dtype, device)?.broadcast_as(probs.shape())?;
            probs = row_has_keys.where_cond(&probs, &zeros)?;
        }

        let nan_count = probs
            .ne(&probs)?
            .to_dtype(DType::F32)?
            .sum_all()?
            .to_scalar::<f32>()?;
        if nan_count > 0.0 {
            return Err(AttentionError::NumericInstability {
                context: format!("{nan_count} NaN attention probabilities"),
            });
        }

        let weights = match config.active_dropout(training) {
            Some(p) if !(0.0..=1.0).contains(&p) => {
                return Err(AttentionError::config(format!(
                    "dropout probability must be in [0, 1], got {p}"
                )));
            }
            Some(p) if p >= 1.0 => probs.zeros_like()?,
            Some(p) => dropout(&probs, p)?,
            None => probs.clone(),
        };

        let context = weights
            .reshape((merged, q_len, k_len))?
            .matmul(&v_work.reshape((merged, k_len, head_dim))?)?
            .reshape((batch, heads, q_len, head_dim))?
            .to_dtype(dtype)?;

        Ok((context, probs))
    }

    /// Validates a `[batch, 1|heads, q_len, k_len]` mask and normalises it to 0/1.
    fn prepare_mask(
        &self,
        mask: &Tensor,
        (batch, heads, q_len, k_len): (usize, usize, usize, usize),
        q: &Tensor,
    ) -> Result<Tensor> {
        if !q.device().same_device(mask.device()) {
            return Err(AttentionError::shape(
                "mask must reside on the same device as q",
            ));
        }
        let (mb, mh, mq, mk) = mask.dims4().map_err(|_| {
            AttentionError::shape(format!(
                "mask must have shape [batch, heads|1, q_len, k_len], got {:?}",
                mask.dims()
            ))
        })?;
        if mb != batch || mq != q_len || mk != k_len {
            return Err(AttentionError::shape(format!(
                "mask shape mismatch: expected [{batch}, 1|{heads}, {q_len}, {k_len}] got [{mb}, {mh}, {mq}, {mk}]"
            )));
        }
        if mh != 1 && mh != heads {
            return Err(AttentionError::shape(format!(
                "mask head dimension must be 1 or {heads}, got {mh}"
            )));
        }
        Ok(keep_mask(mask)?)
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
        training: bool,
    ) -> Result<Tensor> {
        self.attend_with_probabilities(q, k, v, mask, config, training)
            .map(|(context, _)| context)
    }
}

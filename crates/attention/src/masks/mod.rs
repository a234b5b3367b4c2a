//! Binary keep-masks shared by the attention block and kernels.
//!
//! Masks are shaped `[batch, q_len, k_len]` (the kernel additionally accepts a
//! head axis of size 1 or `n_heads`). A non-zero entry at `(b, i, j)` lets query
//! `i` attend to key `j`; zero excludes it. Builders in this module emit
//! [`MASK_DTYPE`] tensors holding exactly `0` or `1`, and [`keep_mask`]
//! normalises caller supplied masks of any numeric dtype to the same form.

pub mod causal;
pub mod padding;

use candle_core::{DType, Result, Tensor, D};

/// Dtype shared by all normalised masks.
pub const MASK_DTYPE: DType = DType::U8;

pub use causal::causal_mask;
pub use padding::{padding_mask_from_booleans, padding_mask_from_lengths};

/// Normalises a mask of any numeric dtype to a `0`/`1` [`MASK_DTYPE`] tensor.
pub fn keep_mask(mask: &Tensor) -> Result<Tensor> {
    mask.to_dtype(DType::F32)?.ne(0f32)
}

/// Logical AND of two masks; shapes must broadcast.
pub fn combine_masks(lhs: &Tensor, rhs: &Tensor) -> Result<Tensor> {
    keep_mask(lhs)?.broadcast_mul(&keep_mask(rhs)?)
}

/// Number of query rows in which no key is attendable.
pub fn fully_masked_rows(mask: &Tensor) -> Result<usize> {
    let row_max = keep_mask(mask)?.to_dtype(DType::F32)?.max(D::Minus1)?;
    let empty = row_max
        .eq(0f32)?
        .to_dtype(DType::F32)?
        .sum_all()?
        .to_scalar::<f32>()?;
    Ok(empty as usize)
}

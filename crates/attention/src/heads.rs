//! Conversions between sequence layout and per-head layout.
//!
//! [`split_heads`] turns `(batch, seq, embed)` into
//! `(batch, heads, seq, embed / heads)` and [`merge_heads`] undoes it. Both are
//! pure layout changes: element values are never modified.

use candle_core::Tensor;

use crate::core::{AttentionError, Result};

/// Splits the embedding axis into `heads` groups and moves the head axis
/// before the sequence axis. The result is contiguous.
pub fn split_heads(tensor: &Tensor, heads: usize) -> Result<Tensor> {
    let (batch, seq, embed) = tensor.dims3().map_err(|_| {
        AttentionError::shape(format!(
            "split_heads expects [batch, seq, embed], got {:?}",
            tensor.dims()
        ))
    })?;
    if heads == 0 || embed % heads != 0 {
        return Err(AttentionError::shape(format!(
            "embedding size {embed} cannot be split into {heads} heads"
        )));
    }
    let per_head = embed / heads;
    Ok(tensor
        .reshape((batch, seq, heads, per_head))?
        .permute((0, 2, 1, 3))?
        .contiguous()?)
}

/// Concatenates heads back along the embedding axis.
pub fn merge_heads(tensor: &Tensor) -> Result<Tensor> {
    let (batch, heads, seq, per_head) = tensor.dims4().map_err(|_| {
        AttentionError::shape(format!(
            "merge_heads expects [batch, heads, seq, head_dim], got {:?}",
            tensor.dims()
        ))
    })?;
    Ok(tensor
        .permute((0, 2, 1, 3))?
        .reshape((batch, seq, heads * per_head))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn split_places_each_head_slice_contiguously() -> Result<()> {
        let device = Device::Cpu;
        let data: Vec<f32> = (0..2 * 3 * 4).map(|v| v as f32).collect();
        let x = Tensor::from_vec(data, (2, 3, 4), &device)?;

        let heads = split_heads(&x, 2)?;
        assert_eq!(heads.dims(), &[2, 2, 3, 2]);
        assert!(heads.is_contiguous());

        // batch 0, head 1, position 2 -> features 2..4 of x[0, 2]
        let picked = heads.get(0)?.get(1)?.get(2)?.to_vec1::<f32>()?;
        assert_eq!(picked, vec![10.0, 11.0]);
        Ok(())
    }

    #[test]
    fn merge_inverts_split() -> Result<()> {
        let device = Device::Cpu;
        let x = Tensor::randn(0f32, 1.0, (3, 5, 8), &device)?;
        for heads in [1usize, 2, 4, 8] {
            let round_trip = merge_heads(&split_heads(&x, heads)?)?;
            assert_eq!(round_trip.dims(), x.dims());
            let diff = round_trip.sub(&x)?.abs()?.max_all()?.to_vec0::<f32>()?;
            assert_eq!(diff, 0.0, "heads={heads}");
        }
        Ok(())
    }

    #[test]
    fn rejects_indivisible_embeddings_and_bad_ranks() -> Result<()> {
        let device = Device::Cpu;
        let x = Tensor::zeros((1, 2, 6), DType::F32, &device)?;
        assert!(matches!(
            split_heads(&x, 4),
            Err(AttentionError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            split_heads(&x, 0),
            Err(AttentionError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            merge_heads(&x),
            Err(AttentionError::ShapeMismatch { .. })
        ));
        Ok(())
    }
}

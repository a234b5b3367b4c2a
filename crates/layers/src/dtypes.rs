//! Dtype rules for projection parameters.
//!
//! Weights are stored in one of [`PARAMETER_DTYPES`]. Half precision weights
//! are promoted to `f32` for the matmul and the product is narrowed back, so a
//! `bf16` block still accumulates its projections in single precision.

use candle_core::{DType, Result, Tensor};

/// Floating point dtypes accepted for parameters and activations.
pub const PARAMETER_DTYPES: [DType; 4] = [DType::F16, DType::BF16, DType::F32, DType::F64];

/// Storage and compute dtypes of a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionPolicy {
    storage: DType,
    compute: DType,
}

impl PrecisionPolicy {
    pub fn new(storage: DType, compute: DType) -> Self {
        Self { storage, compute }
    }

    /// `f16` and `bf16` compute in `f32`; `f32` and `f64` compute as stored.
    pub fn from_parameter_dtype(storage: DType) -> Self {
        match storage {
            DType::F16 | DType::BF16 => Self::new(storage, DType::F32),
            other => Self::new(other, other),
        }
    }

    pub fn storage(&self) -> DType {
        self.storage
    }

    pub fn compute(&self) -> DType {
        self.compute
    }

    pub fn is_mixed_precision(&self) -> bool {
        self.storage != self.compute
    }

    /// Promotes `tensor` to the compute dtype. Already matching tensors are shared, not copied.
    pub fn cast_for_matmul(&self, tensor: &Tensor) -> Result<Tensor> {
        cast(tensor, self.compute)
    }

    /// Narrows `tensor` to the storage dtype.
    pub fn cast_to_storage(&self, tensor: &Tensor) -> Result<Tensor> {
        cast(tensor, self.storage)
    }
}

fn cast(tensor: &Tensor, dtype: DType) -> Result<Tensor> {
    match tensor.dtype() {
        current if current == dtype => Ok(tensor.clone()),
        _ => tensor.to_dtype(dtype),
    }
}

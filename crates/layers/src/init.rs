//! Weight initialisation policies for dense projections.
//!
//! Every projection samples its `(out_dim, in_dim)` weight through a
//! [`WeightInitializer`]. [`LinearInit`] covers the random recipes common to
//! transformer blocks, while [`ConstantInit`] loads fixed values, optionally
//! transposing them for kernels stored in `(in_dim, out_dim)` order.

use std::fmt;

use candle_core::{DType, Device, Error, Result, Tensor};

use crate::checks;

/// Produces the initial value of a weight tensor.
pub trait WeightInitializer: fmt::Debug + Send + Sync {
    /// Builds a tensor shaped `(out_dim, in_dim)` with the requested dtype.
    fn initialize(&self, shape: (usize, usize), device: &Device, dtype: DType) -> Result<Tensor>;
}

/// Standard deviation used by [`LinearInit::default`].
pub const DEFAULT_NORMAL_STD: f64 = 0.01;

/// Supported random initialisation policies for transformer projections.
#[derive(Debug, Clone, PartialEq)]
pub enum LinearInit {
    /// Zero-mean normal distribution with a fixed standard deviation.
    Normal { std: f64 },
    /// Xavier/Glorot uniform initialisation.
    XavierUniform,
    /// Xavier/Glorot normal initialisation.
    XavierNormal,
    /// Kaiming/He uniform initialisation.
    KaimingUniform { negative_slope: f64 },
    /// Kaiming/He normal initialisation.
    KaimingNormal { negative_slope: f64 },
    /// Scales another policy to support deep network stabilisation.
    Scaled { base: Box<LinearInit>, scale: f64 },
}

impl Default for LinearInit {
    fn default() -> Self {
        Self::Normal {
            std: DEFAULT_NORMAL_STD,
        }
    }
}

impl LinearInit {
    /// Convenience helper to scale an existing policy.
    pub fn scaled(base: LinearInit, scale: f64) -> Self {
        Self::Scaled {
            base: Box::new(base),
            scale,
        }
    }

    fn sample_f32(&self, shape: (usize, usize), device: &Device) -> Result<Tensor> {
        let (out_dim, in_dim) = shape;
        let (fan_in, fan_out) = (in_dim as f64, out_dim as f64);
        match self {
            LinearInit::Normal { std } => {
                if *std < 0.0 || !std.is_finite() {
                    return Err(Error::Msg(format!(
                        "normal init requires a finite, non-negative std, got {std}"
                    )));
                }
                Tensor::randn(0f32, *std as f32, shape, device)
            }
            LinearInit::XavierUniform => {
                let bound = (6.0f64 / (fan_in + fan_out)).sqrt();
                Tensor::rand(-bound as f32, bound as f32, shape, device)
            }
            LinearInit::XavierNormal => {
                let std = (2.0f64 / (fan_in + fan_out)).sqrt();
                Tensor::randn(0f32, std as f32, shape, device)
            }
            LinearInit::KaimingUniform { negative_slope } => {
                let gain = (2.0f64 / (1.0 + negative_slope.powi(2))).sqrt();
                let bound = 3.0f64.sqrt() * gain / fan_in.sqrt();
                Tensor::rand(-bound as f32, bound as f32, shape, device)
            }
            LinearInit::KaimingNormal { negative_slope } => {
                let gain = (2.0f64 / (1.0 + negative_slope.powi(2))).sqrt();
                let std = gain / fan_in.sqrt();
                Tensor::randn(0f32, std as f32, shape, device)
            }
            LinearInit::Scaled { base, scale } => base.sample_f32(shape, device)?.affine(*scale, 0.0),
        }
    }
}

impl WeightInitializer for LinearInit {
    fn initialize(&self, shape: (usize, usize), device: &Device, dtype: DType) -> Result<Tensor> {
        let (out_dim, in_dim) = shape;
        if out_dim == 0 || in_dim == 0 {
            return Err(Error::Msg(format!(
                "cannot initialise an empty weight of shape {shape:?}"
            )));
        }
        let weight = self.sample_f32(shape, device)?;
        if dtype == DType::F32 {
            Ok(weight)
        } else {
            checks::ensure_cast_supported("linear.init", DType::F32, dtype)?;
            weight.to_dtype(dtype)
        }
    }
}

/// Loads a weight from a flat array of constants.
///
/// With `transpose` set the values are read as an `(in_dim, out_dim)` kernel
/// and transposed into the `(out_dim, in_dim)` layout used by [`crate::Linear`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantInit {
    values: Vec<f64>,
    transpose: bool,
}

impl ConstantInit {
    /// Values already laid out as `(out_dim, in_dim)`, row-major.
    pub fn new(values: impl Into<Vec<f64>>) -> Self {
        Self {
            values: values.into(),
            transpose: false,
        }
    }

    /// Values laid out as an `(in_dim, out_dim)` kernel, row-major.
    pub fn transposed(values: impl Into<Vec<f64>>) -> Self {
        Self {
            values: values.into(),
            transpose: true,
        }
    }
}

impl WeightInitializer for ConstantInit {
    fn initialize(&self, shape: (usize, usize), device: &Device, dtype: DType) -> Result<Tensor> {
        let (out_dim, in_dim) = shape;
        if self.values.len() != out_dim * in_dim {
            return Err(Error::Msg(format!(
                "constant init holds {} values but weight shape {shape:?} needs {}",
                self.values.len(),
                out_dim * in_dim
            )));
        }
        checks::ensure_cast_supported("constant.init", DType::F64, dtype)?;
        let weight = if self.transpose {
            Tensor::from_vec(self.values.clone(), (in_dim, out_dim), device)?
                .t()?
                .contiguous()?
        } else {
            Tensor::from_vec(self.values.clone(), (out_dim, in_dim), device)?
        };
        weight.to_dtype(dtype)
    }
}

//! Error types emitted by the attention block and its kernels.

use thiserror::Error;

/// Attention-specific error category.
#[derive(Debug, Error)]
pub enum AttentionError {
    /// Tensor shapes, devices or dtypes disagree with the documented contract.
    #[error("shape mismatch: {context}")]
    ShapeMismatch { context: String },
    /// Configuration values violate the block invariants.
    #[error("invalid configuration: {context}")]
    InvalidConfiguration { context: String },
    /// Forward or parameter access before the block was initialised.
    #[error("attention block is not initialised: {context}")]
    UninitializedState { context: &'static str },
    /// The attention probabilities contain NaN.
    #[error("numeric instability: {context}")]
    NumericInstability { context: String },
    /// The kernel does not support the requested data type.
    #[error("unsupported dtype {requested}")]
    UnsupportedDType { requested: String },
    /// Loading a configuration file failed.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A Candle failure propagated to the caller.
    #[error("backend error: {0}")]
    Backend(#[from] candle_core::Error),
}

impl AttentionError {
    pub(crate) fn shape(context: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
        }
    }

    pub(crate) fn config(context: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            context: context.into(),
        }
    }
}

/// Failures while reading a block configuration from disk.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported configuration format: {0}")]
    Format(String),
}

pub type Result<T, E = AttentionError> = std::result::Result<T, E>;

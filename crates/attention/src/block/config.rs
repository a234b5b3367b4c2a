//! Block-level configuration.
//!
//! [`BlockConfig`] is the serialisable surface of the attention block. It can
//! be built in code or loaded from a `.toml` or `.json` file:
//!
//! ```toml
//! embedding_size = 4
//! head_count = 2
//! attention_dropout_probability = 0.0
//! masked_rows = "zero_fill"
//! ```

use std::{fs, path::Path};

use serde::Deserialize;

use crate::core::{AttentionError, Config, ConfigError, MaskedRowPolicy, Result, ScorePrecision};

/// Hyper-parameters of a [`ScaledDotProductAttentionBlock`](super::ScaledDotProductAttentionBlock).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockConfig {
    /// Width of key, query and value embeddings, and of the output.
    pub embedding_size: usize,
    /// Number of attention heads; must divide `embedding_size`.
    pub head_count: usize,
    /// Dropout applied to the attention probabilities in training mode.
    #[serde(default)]
    pub attention_dropout_probability: f32,
    #[serde(default)]
    pub masked_rows: MaskedRowPolicy,
    #[serde(default)]
    pub precision: ScorePrecision,
}

impl BlockConfig {
    pub fn new(embedding_size: usize, head_count: usize) -> Self {
        Self {
            embedding_size,
            head_count,
            attention_dropout_probability: 0.0,
            masked_rows: MaskedRowPolicy::default(),
            precision: ScorePrecision::default(),
        }
    }

    /// Size of each head's slice of the embedding.
    pub fn per_head_size(&self) -> usize {
        self.embedding_size / self.head_count.max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.embedding_size == 0 {
            return Err(AttentionError::config("embedding_size must be greater than zero"));
        }
        if self.head_count == 0 {
            return Err(AttentionError::config("head_count must be greater than zero"));
        }
        if self.embedding_size % self.head_count != 0 {
            return Err(AttentionError::config(format!(
                "embedding_size ({}) must be divisible by head_count ({})",
                self.embedding_size, self.head_count
            )));
        }
        let p = self.attention_dropout_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(AttentionError::config(format!(
                "attention_dropout_probability must be in [0, 1], got {p}"
            )));
        }
        Ok(())
    }

    /// Loads and validates a configuration file. The format follows the extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(ConfigError::from)?;
        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&contents)?,
            Some("toml") | None => Self::from_toml_str(&contents)?,
            Some(other) => {
                return Err(ConfigError::Format(format!(
                    "unsupported configuration extension '{other}'"
                ))
                .into());
            }
        };
        log::debug!("loaded attention block config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(contents: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(contents).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Kernel settings derived from this configuration.
    pub(crate) fn kernel_config(&self) -> Config {
        let p = self.attention_dropout_probability;
        Config {
            dropout_p: (p > 0.0).then_some(p),
            precision: self.precision,
            masked_rows: self.masked_rows,
        }
    }
}

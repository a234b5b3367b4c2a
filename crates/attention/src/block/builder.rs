use std::sync::Arc;

use layers::WeightInitializer;

use super::{BlockConfig, ScaledDotProductAttentionBlock};
use crate::core::{AttentionError, MaskedRowPolicy, Result, ScorePrecision};

/// Fluent constructor for [`ScaledDotProductAttentionBlock`].
///
/// `embedding_size` and `head_count` are required; everything else has a default.
#[derive(Debug, Default)]
pub struct BlockBuilder {
    embedding_size: Option<usize>,
    head_count: Option<usize>,
    attention_dropout_probability: f32,
    masked_rows: MaskedRowPolicy,
    precision: ScorePrecision,
    initializer: Option<Arc<dyn WeightInitializer>>,
}

impl BlockBuilder {
    pub fn embedding_size(mut self, embedding_size: usize) -> Self {
        self.embedding_size = Some(embedding_size);
        self
    }

    pub fn head_count(mut self, head_count: usize) -> Self {
        self.head_count = Some(head_count);
        self
    }

    pub fn attention_dropout_probability(mut self, probability: f32) -> Self {
        self.attention_dropout_probability = probability;
        self
    }

    pub fn masked_rows(mut self, policy: MaskedRowPolicy) -> Self {
        self.masked_rows = policy;
        self
    }

    pub fn precision(mut self, precision: ScorePrecision) -> Self {
        self.precision = precision;
        self
    }

    /// Initializer shared by all four projections.
    pub fn initializer(mut self, init: impl WeightInitializer + 'static) -> Self {
        self.initializer = Some(Arc::new(init));
        self
    }

    pub fn build(self) -> Result<ScaledDotProductAttentionBlock> {
        let embedding_size = self
            .embedding_size
            .ok_or_else(|| AttentionError::config("embedding_size is required"))?;
        let head_count = self
            .head_count
            .ok_or_else(|| AttentionError::config("head_count is required"))?;
        let config = BlockConfig {
            embedding_size,
            head_count,
            attention_dropout_probability: self.attention_dropout_probability,
            masked_rows: self.masked_rows,
            precision: self.precision,
        };
        let mut block = ScaledDotProductAttentionBlock::new(config)?;
        if let Some(init) = self.initializer {
            block.default_init = init;
        }
        Ok(block)
    }
}

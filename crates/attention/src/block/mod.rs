//! The multi-head scaled dot-product attention block.
//!
//! The block owns four bias-free projections (key, query, value, result) and
//! runs the pipeline
//! `project → split heads → scaled masked attention → merge heads → project`.
//! Inputs are `key [batch, from, embed]`, `query [batch, to, embed]`,
//! `value [batch, from, embed]` and an optional keep-mask `[batch, to, from]`;
//! the output is `[batch, to, embed]`.
//!
//! A freshly built block holds no weights. [`initialize`] samples them from
//! the configured initializers for a given set of input shapes; after that,
//! [`forward`] can be called any number of times, concurrently if desired.
//!
//! [`initialize`]: ScaledDotProductAttentionBlock::initialize
//! [`forward`]: ScaledDotProductAttentionBlock::forward

mod builder;
mod config;


use std::{fmt, sync::Arc};

use candle_core::{DType, Device, Tensor};
use layers::{
    dtypes::PARAMETER_DTYPES, Linear, LinearConfig, LinearInit, LinearLayer, PrecisionPolicy,
    WeightInitializer,
};

pub use builder::BlockBuilder;
pub use config::BlockConfig;

use crate::core::{AttentionError, Config, Result};
use crate::heads::{merge_heads, split_heads};
use crate::masks;
use crate::reference::ExactAttention;

/// Identifies one of the block's projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Projection {
    Key,
    Query,
    Value,
    Result,
}

impl Projection {
    pub const ALL: [Projection; 4] = [
        Projection::Key,
        Projection::Query,
        Projection::Value,
        Projection::Result,
    ];

    fn index(self) -> usize {
        match self {
            Projection::Key => 0,
            Projection::Query => 1,
            Projection::Value => 2,
            Projection::Result => 3,
        }
    }
}

/// Result of a forward pass that also exposes the attention probabilities.
#[derive(Debug, Clone)]
pub struct AttentionOutput {
    /// `[batch, to, embed]`, in the dtype of the query.
    pub output: Tensor,
    /// `[batch, heads, to, from]`, masked and normalised, before dropout.
    pub probabilities: Tensor,
}

struct ProjectionWeights {
    projections: [Linear; 4],
    policy: PrecisionPolicy,
    device: Device,
}

impl ProjectionWeights {
    fn get(&self, projection: Projection) -> &Linear {
        &self.projections[projection.index()]
    }
}

enum BlockState {
    Uninitialized,
    Initialized(ProjectionWeights),
}

/// Multi-head scaled dot-product attention with learned projections.
pub struct ScaledDotProductAttentionBlock {
    config: BlockConfig,
    kernel_config: Config,
    kernel: ExactAttention,
    default_init: Arc<dyn WeightInitializer>,
    overrides: [Option<Arc<dyn WeightInitializer>>; 4],
    state: BlockState,
}

impl fmt::Debug for ScaledDotProductAttentionBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScaledDotProductAttentionBlock")
            .field("config", &self.config)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl ScaledDotProductAttentionBlock {
    /// Creates an uninitialised block. Projections default to [`LinearInit::default`].
    ///
    /// `ATTENTION_PRECISION` and `ATTENTION_MASKED_ROWS`, when set to a recognised
    /// value, replace `precision` and `masked_rows` from `config`. The override
    /// is read once, here.
    pub fn new(config: BlockConfig) -> Result<Self> {
        config.validate()?;
        let mut kernel_config = config.kernel_config();
        kernel_config.apply_env_overrides();
        Ok(Self {
            config,
            kernel_config,
            kernel: ExactAttention::new(),
            default_init: Arc::new(LinearInit::default()),
            overrides: Default::default(),
            state: BlockState::Uninitialized,
        })
    }

    pub fn builder() -> BlockBuilder {
        BlockBuilder::default()
    }

    pub fn config(&self) -> &BlockConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, BlockState::Initialized(_))
    }

    /// Sets the initializer of every projection, dropping per-projection overrides.
    ///
    /// Takes effect on the next [`initialize`](Self::initialize).
    pub fn set_initializer(&mut self, init: impl WeightInitializer + 'static) {
        self.default_init = Arc::new(init);
        self.overrides = Default::default();
    }

    /// Sets the initializer of a single projection.
    ///
    /// Takes effect on the next [`initialize`](Self::initialize).
    pub fn set_projection_initializer(
        &mut self,
        projection: Projection,
        init: impl WeightInitializer + 'static,
    ) {
        self.overrides[projection.index()] = Some(Arc::new(init));
    }

    /// Allocates all projection weights for the given input shapes.
    ///
    /// Any previously held weights are discarded.
    pub fn initialize(
        &mut self,
        device: &Device,
        dtype: DType,
        key_shape: &[usize],
        query_shape: &[usize],
        value_shape: &[usize],
    ) -> Result<()> {
        if !PARAMETER_DTYPES.contains(&dtype) {
            return Err(AttentionError::UnsupportedDType {
                requested: format!("{dtype:?}"),
            });
        }
        let embed = self.config.embedding_size;
        let (key_batch, from_len) = sequence_dims("key", key_shape, embed)?;
        let (query_batch, to_len) = sequence_dims("query", query_shape, embed)?;
        let (value_batch, value_len) = sequence_dims("value", value_shape, embed)?;
        if key_batch != query_batch || key_batch != value_batch {
            return Err(AttentionError::shape(format!(
                "batch sizes differ: key {key_batch}, query {query_batch}, value {value_batch}"
            )));
        }
        if from_len != value_len {
            return Err(AttentionError::shape(format!(
                "key length {from_len} differs from value length {value_len}"
            )));
        }

        let build = |projection: Projection| -> Result<Linear> {
            let init = self.overrides[projection.index()]
                .as_ref()
                .unwrap_or(&self.default_init);
            Ok(Linear::with_init(
                LinearConfig::without_bias(embed, embed),
                init.as_ref(),
                device,
                dtype,
            )?)
        };
        let projections = [
            build(Projection::Key)?,
            build(Projection::Query)?,
            build(Projection::Value)?,
            build(Projection::Result)?,
        ];

        log::info!(
            "attention block init: embed={} heads={} head_dim={} dtype={:?} from_len={} to_len={}",
            embed,
            self.config.head_count,
            self.config.per_head_size(),
            dtype,
            from_len,
            to_len
        );
        self.state = BlockState::Initialized(ProjectionWeights {
            projections,
            policy: PrecisionPolicy::from_parameter_dtype(dtype),
            device: device.clone(),
        });
        Ok(())
    }

    /// Shape of the output for a query of shape `query_shape`.
    pub fn output_shape(&self, query_shape: &[usize]) -> Result<Vec<usize>> {
        let (batch, to_len) = sequence_dims("query", query_shape, self.config.embedding_size)?;
        Ok(vec![batch, to_len, self.config.embedding_size])
    }

    /// Returns one of the initialised projections.
    pub fn projection(&self, projection: Projection) -> Result<&Linear> {
        Ok(self.weights()?.get(projection))
    }

    /// Runs attention and returns `[batch, to, embed]`.
    pub fn forward(
        &self,
        key: &Tensor,
        query: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
        training: bool,
    ) -> Result<Tensor> {
        self.forward_with_probabilities(key, query, value, mask, training)
            .map(|out| out.output)
    }

    /// Same as [`forward`](Self::forward) but also returns the attention probabilities.
    pub fn forward_with_probabilities(
        &self,
        key: &Tensor,
        query: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
        training: bool,
    ) -> Result<AttentionOutput> {
        let weights = self.weights()?;
        let (batch, from_len, to_len) = self.validate_inputs(weights, key, query, value)?;

        let mask = match mask {
            Some(mask) => {
                if mask.dims() != [batch, to_len, from_len] {
                    return Err(AttentionError::shape(format!(
                        "mask must be [{batch}, {to_len}, {from_len}], got {:?}",
                        mask.dims()
                    )));
                }
                if log::log_enabled!(log::Level::Debug) {
                    let empty = masks::fully_masked_rows(mask)?;
                    if empty > 0 {
                        log::debug!(
                            "attention mask has {empty} fully masked rows ({:?})",
                            self.kernel_config.masked_rows
                        );
                    }
                }
                Some(mask.unsqueeze(1)?)
            }
            None => None,
        };
        log::debug!(
            "attention forward: batch={batch} from={from_len} to={to_len} training={training}"
        );

        let heads = self.config.head_count;
        let policy = &weights.policy;
        let k = weights.get(Projection::Key).forward(key, policy)?;
        let q = weights.get(Projection::Query).forward(query, policy)?;
        let v = weights.get(Projection::Value).forward(value, policy)?;

        let (context, probabilities) = self.kernel.attend_with_probabilities(
            &split_heads(&q, heads)?,
            &split_heads(&k, heads)?,
            &split_heads(&v, heads)?,
            mask.as_ref(),
            &self.kernel_config,
            training,
        )?;

        let output = weights
            .get(Projection::Result)
            .forward(&merge_heads(&context)?, policy)?
            .to_dtype(query.dtype())?;
        Ok(AttentionOutput {
            output,
            probabilities,
        })
    }

    fn weights(&self) -> Result<&ProjectionWeights> {
        match &self.state {
            BlockState::Initialized(weights) => Ok(weights),
            BlockState::Uninitialized => Err(AttentionError::UninitializedState {
                context: "initialize must be called before using the projections",
            }),
        }
    }

    /// Returns `(batch, from_len, to_len)` once every input agrees.
    fn validate_inputs(
        &self,
        weights: &ProjectionWeights,
        key: &Tensor,
        query: &Tensor,
        value: &Tensor,
    ) -> Result<(usize, usize, usize)> {
        let embed = self.config.embedding_size;
        let (key_batch, from_len) = sequence_dims("key", key.dims(), embed)?;
        let (query_batch, to_len) = sequence_dims("query", query.dims(), embed)?;
        let (value_batch, value_len) = sequence_dims("value", value.dims(), embed)?;
        if key_batch != query_batch || key_batch != value_batch {
            return Err(AttentionError::shape(format!(
                "batch sizes differ: key {key_batch}, query {query_batch}, value {value_batch}"
            )));
        }
        if from_len != value_len {
            return Err(AttentionError::shape(format!(
                "key length {from_len} differs from value length {value_len}"
            )));
        }
        if key.dtype() != query.dtype() || key.dtype() != value.dtype() {
            return Err(AttentionError::shape(format!(
                "key, query, value dtypes differ: {:?}, {:?}, {:?}",
                key.dtype(),
                query.dtype(),
                value.dtype()
            )));
        }
        if !PARAMETER_DTYPES.contains(&query.dtype()) {
            return Err(AttentionError::UnsupportedDType {
                requested: format!("{:?}", query.dtype()),
            });
        }
        for tensor in [key, query, value] {
            if !tensor.device().same_device(&weights.device) {
                return Err(AttentionError::shape(
                    "inputs must reside on the device the block was initialised on",
                ));
            }
        }
        Ok((key_batch, from_len, to_len))
    }
}

/// Checks a `[batch, seq, embed]` shape and returns `(batch, seq)`.
fn sequence_dims(name: &str, shape: &[usize], embed: usize) -> Result<(usize, usize)> {
    match *shape {
        [batch, seq, actual] if actual == embed && batch > 0 && seq > 0 => Ok((batch, seq)),
        [_, _, actual] if actual != embed => Err(AttentionError::shape(format!(
            "{name} embedding size {actual} does not match configured {embed}"
        ))),
        _ => Err(AttentionError::shape(format!(
            "{name} must be a non-empty [batch, seq, {embed}] tensor, got {shape:?}"
        ))),
    }
}

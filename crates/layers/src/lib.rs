//! Building blocks for attention projections.
//!
//! The crate hosts dense projections, weight initialisation policies, and the
//! precision rules shared by every layer, all assembled from Candle primitives.
//! Functions return `candle_core::Result` so callers can propagate failures
//! with `?` and attach their own context.

pub mod checks;
pub mod dtypes;
pub mod init;
pub mod linear;

pub use dtypes::PrecisionPolicy;
pub use init::{ConstantInit, LinearInit, WeightInitializer};
pub use linear::{Linear, LinearConfig, LinearLayer};

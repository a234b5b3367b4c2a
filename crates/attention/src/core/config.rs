//! Configuration options shared by attention kernels.
//!
//! The [`Config`] struct captures run-time knobs such as dropout, the dtype in
//! which scores are accumulated and how rows without any attendable key are
//! treated. Callers can tune them without swapping implementations.

use serde::Deserialize;

/// Environment variable overriding [`Config::precision`] (`f32` or `inherit`).
pub const PRECISION_ENV: &str = "ATTENTION_PRECISION";
/// Environment variable overriding [`Config::masked_rows`] (`zero` or `uniform`).
pub const MASKED_ROWS_ENV: &str = "ATTENTION_MASKED_ROWS";

/// Dtype used while computing scores, softmax and the value product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorePrecision {
    /// Promote q, k and v to `f32`, cast the context back to the input dtype.
    #[default]
    ForceF32,
    /// Compute `f32` and `f64` inputs as given. Half precision inputs still
    /// compute in `f32`, following [`layers::PrecisionPolicy`].
    Inherit,
}

impl ScorePrecision {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "f32" | "force_f32" => Some(Self::ForceF32),
            "inherit" => Some(Self::Inherit),
            _ => None,
        }
    }
}

/// Treatment of query rows whose mask excludes every key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskedRowPolicy {
    /// Attention probabilities of the row are all zero, so its context is the zero vector.
    #[default]
    ZeroFill,
    /// Every key receives the same weight, `1 / k_len`.
    Uniform,
}

impl MaskedRowPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "zero" | "zero_fill" => Some(Self::ZeroFill),
            "uniform" => Some(Self::Uniform),
            _ => None,
        }
    }
}

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
    /// Probability for dropout applied to attention weights during training.
    ///
    /// When `None`, dropout is disabled and the computation is deterministic.
    pub dropout_p: Option<f32>,
    pub precision: ScorePrecision,
    pub masked_rows: MaskedRowPolicy,
}

impl Config {
    /// Applies [`PRECISION_ENV`] and [`MASKED_ROWS_ENV`] when set to a recognised value.
    ///
    /// Recognised values take precedence over the fields already set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup(PRECISION_ENV) {
            match ScorePrecision::parse(&raw) {
                Some(precision) => {
                    log::debug!("attention precision overridden from env: {precision:?}");
                    self.precision = precision;
                }
                None => log::warn!("ignoring {PRECISION_ENV}={raw:?}"),
            }
        }
        if let Some(raw) = lookup(MASKED_ROWS_ENV) {
            match MaskedRowPolicy::parse(&raw) {
                Some(policy) => {
                    log::debug!("attention masked-row policy overridden from env: {policy:?}");
                    self.masked_rows = policy;
                }
                None => log::warn!("ignoring {MASKED_ROWS_ENV}={raw:?}"),
            }
        }
    }

    /// Dropout probability to apply for this call, if any.
    pub(crate) fn active_dropout(&self, training: bool) -> Option<f32> {
        match self.dropout_p {
            Some(p) if training && p > 0.0 => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_override_values() {
        assert_eq!(ScorePrecision::parse("F32"), Some(ScorePrecision::ForceF32));
        assert_eq!(ScorePrecision::parse(" inherit "), Some(ScorePrecision::Inherit));
        assert_eq!(ScorePrecision::parse("f16"), None);
        assert_eq!(MaskedRowPolicy::parse("zero"), Some(MaskedRowPolicy::ZeroFill));
        assert_eq!(MaskedRowPolicy::parse("Uniform"), Some(MaskedRowPolicy::Uniform));
        assert_eq!(MaskedRowPolicy::parse("nan"), None);
    }

    #[test]
    fn dropout_only_active_when_training() {
        let cfg = Config {
            dropout_p: Some(0.1),
            ..Config::default()
        };
        assert_eq!(cfg.active_dropout(true), Some(0.1));
        assert_eq!(cfg.active_dropout(false), None);

        let zero = Config {
            dropout_p: Some(0.0),
            ..Config::default()
        };
        assert_eq!(zero.active_dropout(true), None);
    }

    #[test]
    fn recognised_overrides_replace_explicit_settings() {
        let mut cfg = Config {
            precision: ScorePrecision::Inherit,
            masked_rows: MaskedRowPolicy::ZeroFill,
            ..Config::default()
        };
        cfg.apply_overrides(|name| match name {
            PRECISION_ENV => Some("f32".to_string()),
            MASKED_ROWS_ENV => Some("uniform".to_string()),
            _ => None,
        });
        assert_eq!(cfg.precision, ScorePrecision::ForceF32);
        assert_eq!(cfg.masked_rows, MaskedRowPolicy::Uniform);

        cfg.apply_overrides(|name| (name == MASKED_ROWS_ENV).then(|| "sometimes".to_string()));
        assert_eq!(cfg.masked_rows, MaskedRowPolicy::Uniform);
        cfg.apply_overrides(|_| None);
        assert_eq!(cfg.precision, ScorePrecision::ForceF32);
    }
}

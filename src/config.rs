use crate::error::{MatmulError, Result};
use serde::{Deserialize, Serialize};

/// Granularity of outlier decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierPolicy {
    /// One outlier anywhere in a column pulls the whole column out.
    #[default]
    Column,
    /// Only the elements at or above the threshold are pulled out.
    Element,
}

/// User-facing knobs of the decomposed int8 matmul.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatmulConfig {
    /// Magnitude at which activations leave the int8 path; 0 disables decomposition.
    pub threshold: f32,
    /// Quantize the weight on every call instead of caching it.
    pub has_fp16_weights: bool,
    pub outlier_policy: OutlierPolicy,
}

impl Default for MatmulConfig {
    fn default() -> Self {
        Self { threshold: 0.0, has_fp16_weights: true, outlier_policy: OutlierPolicy::Column }
    }
}

impl MatmulConfig {
    pub fn new(threshold: f32, has_fp16_weights: bool) -> Result<Self> {
        let cfg = Self { threshold, has_fp16_weights, ..Self::default() };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_policy(mut self, policy: OutlierPolicy) -> Self {
        self.outlier_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.threshold)
    }

    #[inline]
    pub fn decomposition_enabled(&self) -> bool { self.threshold > 0.0 }

    /// Parse and validate a JSON config; missing fields take their defaults.
    pub fn from_json(s: &str) -> anyhow::Result<Self> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

pub(crate) fn validate_threshold(threshold: f32) -> Result<()> {
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(MatmulError::InvalidThreshold(threshold));
    }
    Ok(())
}

//! # Analytics Configuration
//!
//! Tunable parameters of the stance scoring function, the bucket
//! normalisation and the delta metric. Loaded by the binary from the
//! `[analytics]` section of its TOML config.

use crate::{LedgerError, LedgerResult};
use serde::{Deserialize, Serialize};

/// Runtime configuration for the snapshot → stance → delta pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Weight of endorsed cred in the raw stance.
    /// Default: 1.0
    pub endorse_weight: f64,

    /// Weight of live (capped) restake cred in the raw stance.
    /// Default: 0.5
    pub restake_weight: f64,

    /// Weight of doubt cred in the raw stance.
    /// Default: 0.25
    pub doubt_weight: f64,

    /// Absolute ceiling on the magnitude of a raw stance.
    /// Default: 3.0
    pub raw_stance_clamp: f64,

    /// z-scores are clamped to `[-z_clamp, z_clamp]` before computing deltas.
    /// Default: 3.0
    pub z_clamp: f64,

    /// Lower bound of the small-bucket shrinkage factor.
    /// Default: 0.7
    pub min_shrinkage: f64,

    /// Maximum depth of a point cluster below its root.
    /// Default: 3
    pub cluster_max_depth: u32,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            endorse_weight: 1.0,
            restake_weight: 0.5,
            doubt_weight: 0.25,
            raw_stance_clamp: 3.0,
            z_clamp: 3.0,
            min_shrinkage: 0.7,
            cluster_max_depth: 3,
        }
    }
}

impl AnalyticsConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> LedgerResult<()> {
        if self.endorse_weight <= 0.0 || self.restake_weight <= 0.0 {
            return Err(LedgerError::Config(format!(
                "endorse_weight and restake_weight must be positive, got {} and {}",
                self.endorse_weight, self.restake_weight
            )));
        }
        if self.doubt_weight < 0.0 {
            return Err(LedgerError::Config(format!(
                "doubt_weight must be non-negative, got {}",
                self.doubt_weight
            )));
        }
        if self.raw_stance_clamp <= 0.0 || self.z_clamp <= 0.0 {
            return Err(LedgerError::Config(format!(
                "clamps must be positive, got raw {} and z {}",
                self.raw_stance_clamp, self.z_clamp
            )));
        }
        if !(0.7..=1.0).contains(&self.min_shrinkage) {
            return Err(LedgerError::Config(format!(
                "min_shrinkage must be in [0.7, 1], got {}",
                self.min_shrinkage
            )));
        }
        if self.cluster_max_depth == 0 {
            return Err(LedgerError::Config(
                "cluster_max_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

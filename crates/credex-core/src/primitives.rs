//! # Ledger Primitives
//!
//! Hardcoded constants for the ledger engines and the analytics pipeline.
//!
//! These are compiled into the binary. Tunable scoring parameters live in
//! [`crate::config::AnalyticsConfig`] instead.

/// Annual yield of a doubt before favorability scaling.
pub const DOUBT_APY: f64 = 0.05;

/// Hours in a (non-leap) year, the denominator of the hourly doubt rate.
pub const HOURS_PER_YEAR: f64 = 365.0 * 24.0;

/// Keeps `ln(favor + ε)` finite when a point has zero favorability.
pub const FAVOR_EPSILON: f64 = 1e-4;

/// Smallest bucket size that is normalised without shrinkage.
pub const SHRINKAGE_FULL_GROUP: usize = 3;

/// Shrinkage lost per missing member below [`SHRINKAGE_FULL_GROUP`].
pub const SHRINKAGE_STEP: f64 = 0.15;

/// Standard deviations below this are treated as "no spread".
pub const VARIANCE_EPSILON: f64 = 1e-9;

/// Milliseconds in one day.
pub const MILLIS_PER_DAY: i64 = 86_400_000;

// =============================================================================
// METADATA SEQUENCE KEYS
// =============================================================================

pub(crate) const SEQ_USER: &str = "next_user_id";
pub(crate) const SEQ_POINT: &str = "next_point_id";
pub(crate) const SEQ_NEGATION: &str = "next_negation_id";
pub(crate) const SEQ_ENDORSEMENT: &str = "next_endorsement_id";
pub(crate) const SEQ_RESTAKE: &str = "next_restake_id";
pub(crate) const SEQ_SLASH: &str = "next_slash_id";
pub(crate) const SEQ_DOUBT: &str = "next_doubt_id";
pub(crate) const SEQ_RATIONALE: &str = "next_rationale_id";
pub(crate) const SEQ_HISTORY: &str = "next_history_seq";
pub(crate) const SEQ_EVENT: &str = "next_event_seq";

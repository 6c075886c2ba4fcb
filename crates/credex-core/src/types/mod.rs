//! # Core Type Definitions
//!
//! This module contains all persisted record types for the cred ledger:
//! - Identifiers (`UserId`, `PointId`, `NegationId`, ...)
//! - Ledger rows (`Point`, `Negation`, `Endorsement`, `Restake`, `Slash`, `Doubt`)
//! - Audit rows (`RestakeHistory`, `SlashHistory`, `DoubtHistory`)
//! - Analytics rows (`CredEvent`, `Snapshot`, `PointCluster`, `DailyStance`)
//! - Error types (`LedgerError`)
//!
//! All amounts of cred are whole integers (`Cred`). Only the analytics layer
//! (stance and delta) works in floating point.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A quantity of cred. Signed so that refunds and clawbacks can be expressed
/// as negative cred events.
pub type Cred = i64;

// =============================================================================
// IDENTIFIERS
// =============================================================================

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// A user holding a cred balance.
    UserId
);
id_type!(
    /// An atomic claim.
    PointId
);
id_type!(
    /// A negation row (an unordered pair of points stored in canonical order).
    NegationId
);
id_type!(
    /// A single endorsement row. A user may hold several per point.
    EndorsementId
);
id_type!(
    /// A restake row, one per (user, point, negation) triple.
    RestakeId
);
id_type!(
    /// A slash row, one per restake.
    SlashId
);
id_type!(
    /// A doubt row, one per (user, point, negation) triple.
    DoubtId
);
id_type!(
    /// A rationale (a structured argument referencing points).
    RationaleId
);
id_type!(
    /// A topic. Topics are the buckets used for stance normalisation.
    TopicId
);

/// Opaque partition tag written on every new row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct SpaceId(pub String);

impl SpaceId {
    /// Create a new space tag.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the space as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// LEDGER PRIMITIVES
// =============================================================================

/// An atomic claim. Mutation engines only read points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub id: PointId,
    pub content: String,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
    pub space: SpaceId,
}

/// A rebuttal relationship between two points.
///
/// `older_point_id < newer_point_id` always holds; the pair is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Negation {
    pub id: NegationId,
    pub older_point_id: PointId,
    pub newer_point_id: PointId,
    pub created_by: UserId,
    pub is_objection: bool,
    pub created_at: DateTime<Utc>,
    pub space: SpaceId,
}

impl Negation {
    /// Sort a pair of points into `(older, newer)` order.
    #[must_use]
    pub fn canonical_pair(a: PointId, b: PointId) -> (PointId, PointId) {
        if a <= b { (a, b) } else { (b, a) }
    }
}

/// A stake of cred a user places on a point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endorsement {
    pub id: EndorsementId,
    pub user_id: UserId,
    pub point_id: PointId,
    pub cred: Cred,
    pub created_at: DateTime<Utc>,
    pub space: SpaceId,
}

/// "If point `negation_id` turns out true, I withdraw `amount` cred of
/// support from `point_id`."
///
/// `negation_id` names the negating (counter) point, not a [`Negation`] row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restake {
    pub id: RestakeId,
    pub user_id: UserId,
    pub point_id: PointId,
    pub negation_id: PointId,
    pub amount: Cred,
    /// Bumped on every edit. Slashes remember the generation they were taken
    /// against.
    pub generation: u64,
    /// Lifecycle anchor. Reset when an exhausted restake is reused.
    pub created_at: DateTime<Utc>,
    pub space: SpaceId,
}

/// Cumulative amount withdrawn from a restake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slash {
    pub id: SlashId,
    pub user_id: UserId,
    pub restake_id: RestakeId,
    pub point_id: PointId,
    pub negation_id: PointId,
    pub amount: Cred,
    pub restake_generation: u64,
    pub created_at: DateTime<Utc>,
    pub space: SpaceId,
}

/// A bet by a third party that a restake will be honored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doubt {
    pub id: DoubtId,
    pub user_id: UserId,
    pub point_id: PointId,
    pub negation_id: PointId,
    pub amount: Cred,
    pub last_earnings_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub space: SpaceId,
}

// =============================================================================
// AUDIT TRAIL
// =============================================================================

/// Action recorded in restake and slash history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StakeAction {
    Created,
    Increased,
    Decreased,
    /// Edit that left the amount as it was.
    Unchanged,
    Deactivated,
}

impl StakeAction {
    /// Classify a change from `previous` to `next`.
    #[must_use]
    pub fn classify(previous: Cred, next: Cred) -> Self {
        if next == 0 {
            Self::Deactivated
        } else if next == previous {
            Self::Unchanged
        } else if next > previous {
            Self::Increased
        } else {
            Self::Decreased
        }
    }

    /// Get the action name as stored by the audit trail.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Increased => "increased",
            Self::Decreased => "decreased",
            Self::Unchanged => "unchanged",
            Self::Deactivated => "deactivated",
        }
    }
}

/// Action recorded in doubt history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DoubtAction {
    Created,
    Increased,
    ReducedBySlash,
}

impl DoubtAction {
    /// Get the action name as stored by the audit trail.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Increased => "increased",
            Self::ReducedBySlash => "reduced_by_slash",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestakeHistory {
    pub restake_id: RestakeId,
    pub user_id: UserId,
    pub action: StakeAction,
    pub previous_amount: Option<Cred>,
    pub new_amount: Cred,
    pub generation: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashHistory {
    pub slash_id: SlashId,
    pub user_id: UserId,
    pub action: StakeAction,
    pub previous_amount: Option<Cred>,
    pub new_amount: Cred,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoubtHistory {
    pub doubt_id: DoubtId,
    pub user_id: UserId,
    pub action: DoubtAction,
    pub previous_amount: Option<Cred>,
    pub new_amount: Cred,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// CRED EVENTS
// =============================================================================

/// Kind of balance-affecting action recorded in the cred event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CredEventKind {
    Endorse,
    Restake,
    Slash,
    Doubt,
}

impl CredEventKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Endorse => "ENDORSE",
            Self::Restake => "RESTAKE",
            Self::Slash => "SLASH",
            Self::Doubt => "DOUBT",
        }
    }
}

/// Append-only analytics event. Refunds and clawbacks carry negative amounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredEvent {
    pub user_id: UserId,
    pub point_id: PointId,
    pub kind: CredEventKind,
    pub amount: Cred,
    pub ts: DateTime<Utc>,
}

impl CredEvent {
    #[must_use]
    pub fn new(
        user_id: UserId,
        point_id: PointId,
        kind: CredEventKind,
        amount: Cred,
        ts: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            point_id,
            kind,
            amount,
            ts,
        }
    }
}

// =============================================================================
// ANALYTICS ROWS
// =============================================================================

/// Cumulative per-user/point totals as of the end of `snap_day`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub snap_day: NaiveDate,
    pub user_id: UserId,
    pub point_id: PointId,
    pub endorse: Cred,
    /// Running `restake - slash` total before the endorsement cap.
    pub restake_live_raw: Cred,
    /// `min(restake_live_raw, endorse)`.
    pub restake_live: Cred,
    pub doubt: Cred,
    pub sign: i8,
    pub bucket_id: Option<TopicId>,
}

/// Membership of a point in a rooted tree of related points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointCluster {
    pub point_id: PointId,
    pub root_id: PointId,
    pub ancestor_id: Option<PointId>,
    pub depth: u32,
    /// Polarity relative to the root: +1 agrees, -1 opposes.
    pub sign: i8,
}

/// Bucket-normalised stance of a user on a point for a day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStance {
    pub snap_day: NaiveDate,
    pub user_id: UserId,
    pub point_id: PointId,
    pub z_value: f64,
}

// =============================================================================
// RATIONALES
// =============================================================================

/// A node in a rationale graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RationaleNode {
    /// The rationale's framing statement.
    Statement { text: String },
    /// A reference to a point.
    Point { point_id: PointId },
}

/// A structured argument built from points, optionally tagged to a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rationale {
    pub id: RationaleId,
    pub title: String,
    pub topic_id: Option<TopicId>,
    pub nodes: Vec<RationaleNode>,
    pub created_by: UserId,
    pub space: SpaceId,
}

impl Rationale {
    /// Point ids referenced by the graph, deduplicated, in first-seen order.
    #[must_use]
    pub fn point_ids(&self) -> Vec<PointId> {
        let mut seen = std::collections::BTreeSet::new();
        self.nodes
            .iter()
            .filter_map(|node| match node {
                RationaleNode::Point { point_id } => Some(*point_id),
                RationaleNode::Statement { .. } => None,
            })
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

// =============================================================================
// JOB REPORTS
// =============================================================================

/// Row counts reported by a batch job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    /// Input rows read (events for snapshots, snapshot rows for stances).
    pub rows_read: u64,
    /// Rows upserted for the day.
    pub rows_written: u64,
    /// Rows carried forward from the previous snapshot day.
    pub rows_carried: u64,
    /// Normalisation buckets processed.
    pub buckets: u64,
    /// Units skipped after a consistency error.
    pub skipped: u64,
}

/// Structured outcome of a batch job. Jobs never return `Err`; an
/// infrastructure failure becomes `success: false` with its message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub success: bool,
    pub message: String,
    pub stats: JobStats,
}

impl JobReport {
    #[must_use]
    pub fn ok(message: impl Into<String>, stats: JobStats) -> Self {
        Self {
            success: true,
            message: message.into(),
            stats,
        }
    }

    #[must_use]
    pub fn failed(error: &LedgerError) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            stats: JobStats::default(),
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the ledger.
///
/// Validation variants are surfaced to callers unchanged. `Storage`,
/// `Serialization` and `Io` are infrastructure failures.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No user could be resolved for the caller.
    #[error("Must be authenticated")]
    Unauthenticated,

    #[error("Restake amount {requested} exceeds endorsement amount {available}")]
    RestakeExceedsEndorsement { requested: Cred, available: Cred },

    #[error("Slash amount {requested} exceeds restake amount {available}")]
    SlashExceedsRestake { requested: Cred, available: Cred },

    #[error("Doubts can only be increased, not decreased (current {current}, requested {requested})")]
    DoubtMustIncrease { current: Cred, requested: Cred },

    #[error("No active restake found")]
    NoActiveRestake,

    #[error("Point not found: {0}")]
    PointNotFound(PointId),

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Rationale not found: {0}")]
    RationaleNotFound(RationaleId),

    /// A point cannot negate itself.
    #[error("Invalid negation: {0} cannot negate itself")]
    InvalidNegation(PointId),

    /// Amounts must be non-negative.
    #[error("Invalid amount: {0}")]
    InvalidAmount(Cred),

    #[error("Cluster build failed for root {root}: {reason}")]
    ClusterBuild { root: PointId, reason: String },

    /// Internal invariant violated in the analytics layer.
    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl LedgerError {
    /// Check if this is a caller-facing validation failure.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::RestakeExceedsEndorsement { .. }
                | Self::SlashExceedsRestake { .. }
                | Self::DoubtMustIncrease { .. }
                | Self::NoActiveRestake
                | Self::InvalidNegation(_)
                | Self::InvalidAmount(_)
        )
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::PointNotFound(_) | Self::UserNotFound(_) | Self::RationaleNotFound(_)
        )
    }
}

/// Result shape returned by ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

// =============================================================================
// TESTS
// =============================================================================

//! # credex-core
//!
//! The cred ledger and its daily analytics pipeline - THE LOGIC.
//!
//! Users stake cred on points, counter-stake against negations (restake),
//! retract counter-stakes (slash) and bet that a restake will be honored
//! (doubt). Every balance-affecting action lands in an append-only cred
//! event log which the nightly pipeline folds into daily snapshots,
//! bucket-normalised stances and, on demand, pairwise user deltas.
//!
//! ## Architectural Constraints
//!
//! - Pure Rust: NO async, NO network dependencies
//! - Every engine mutation is ONE redb write transaction
//!   (balance + rows + audit history together)
//! - Cred event emission happens after commit and is best-effort
//! - Batch jobs are idempotent per day (upsert by key) and return structured
//!   reports instead of errors

// =============================================================================
// MODULES
// =============================================================================

pub mod cluster;
pub mod collaborators;
pub mod config;
pub mod contested;
pub mod delta;
pub mod events;
pub mod ledger;
pub mod pipeline;
pub mod primitives;
pub mod reconcile;
pub mod snapshot;
pub mod stance;
pub mod state;
pub mod storage;
pub mod topics;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Cred, CredEvent, CredEventKind, DailyStance, Doubt, DoubtAction, DoubtHistory, DoubtId,
    Endorsement, EndorsementId, JobReport, JobStats, LedgerError, LedgerResult, Negation,
    NegationId, Point, PointCluster, PointId, Rationale, RationaleId, RationaleNode, Restake,
    RestakeHistory, RestakeId, Slash, SlashHistory, SlashId, Snapshot, SpaceId, StakeAction,
    TopicId, UserId,
};

// =============================================================================
// RE-EXPORTS: Ledger Engines
// =============================================================================

pub use collaborators::{
    Caller, Clock, FavorSource, Identity, ManualClock, NoFavor, Notifier, StaticFavor,
    SystemClock, TracingNotifier,
};
pub use events::CredEventLog;
pub use ledger::{DoubtOutcome, Ledger};
pub use reconcile::{CapAdjustment, CapReconciler, CapReport, RestakeValidation};
pub use state::StakeState;
pub use storage::{LedgerRead, LedgerStore};

// =============================================================================
// RE-EXPORTS: Analytics Pipeline
// =============================================================================

pub use cluster::{ClusterBuilder, NegationClusterBuilder};
pub use config::AnalyticsConfig;
pub use contested::{ContestedPoint, compute_contested_points};
pub use delta::{DeltaAggregator, DeltaResult};
pub use pipeline::{Pipeline, PipelineRangeReport, PipelineReport};
pub use snapshot::SnapshotBuilder;
pub use stance::StanceNormalizer;
pub use topics::{RationaleTopicResolver, TopicResolver};

//! # External Collaborators
//!
//! Interfaces the ledger consumes but does not own: caller identity,
//! notification dispatch, point favorability and wall-clock time.
//!
//! Each trait ships with a minimal in-crate implementation so the ledger can
//! run standalone; the binary supplies its own identity from API keys.

use crate::{Cred, Doubt, LedgerResult, PointId, Restake, Slash, SpaceId, UserId};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;

// =============================================================================
// IDENTITY
// =============================================================================

/// Resolves "who is calling" for a single request.
pub trait Identity {
    /// The authenticated user, or `None` for anonymous callers.
    fn current_user_id(&self) -> Option<UserId>;

    /// Partition tag written on rows created by this request.
    fn current_space(&self) -> SpaceId;
}

/// A resolved caller: the simplest [`Identity`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Caller {
    pub user: Option<UserId>,
    pub space: SpaceId,
}

impl Caller {
    /// An authenticated caller in the default space.
    #[must_use]
    pub fn user(user: UserId) -> Self {
        Self {
            user: Some(user),
            space: SpaceId::default(),
        }
    }

    /// A caller with no resolved user.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn in_space(mut self, space: SpaceId) -> Self {
        self.space = space;
        self
    }
}

impl Identity for Caller {
    fn current_user_id(&self) -> Option<UserId> {
        self.user
    }

    fn current_space(&self) -> SpaceId {
        self.space.clone()
    }
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Fire-and-forget notification dispatch.
///
/// Errors are logged by the caller and never fail the mutation that
/// triggered them.
pub trait Notifier: Send + Sync {
    fn notify_restake(&self, restake: &Restake) -> LedgerResult<()>;

    fn notify_slash(&self, slash: &Slash) -> LedgerResult<()>;

    /// A doubt was placed against a restake on a point owned by `point_owner`.
    fn notify_doubt(&self, doubt: &Doubt, point_owner: UserId) -> LedgerResult<()>;

    /// A slash reduced `doubt` by `reduction`.
    fn notify_doubt_reduction(&self, doubt: &Doubt, reduction: Cred) -> LedgerResult<()>;
}

/// Notifier that only emits tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify_restake(&self, restake: &Restake) -> LedgerResult<()> {
        tracing::info!(
            user = %restake.user_id,
            point = %restake.point_id,
            negation = %restake.negation_id,
            amount = restake.amount,
            "restake notification"
        );
        Ok(())
    }

    fn notify_slash(&self, slash: &Slash) -> LedgerResult<()> {
        tracing::info!(
            user = %slash.user_id,
            restake = %slash.restake_id,
            amount = slash.amount,
            "slash notification"
        );
        Ok(())
    }

    fn notify_doubt(&self, doubt: &Doubt, point_owner: UserId) -> LedgerResult<()> {
        tracing::info!(
            doubter = %doubt.user_id,
            owner = %point_owner,
            amount = doubt.amount,
            "doubt notification"
        );
        Ok(())
    }

    fn notify_doubt_reduction(&self, doubt: &Doubt, reduction: Cred) -> LedgerResult<()> {
        tracing::info!(
            doubter = %doubt.user_id,
            reduction,
            remaining = doubt.amount,
            "doubt reduction notification"
        );
        Ok(())
    }
}

// =============================================================================
// FAVORABILITY
// =============================================================================

/// Current favorability of a point, used by the doubt earnings formula.
pub trait FavorSource: Send + Sync {
    /// Favor of `point`; `0.0` when no signal is available.
    fn favor_of(&self, point: PointId) -> f64;
}

/// No favorability signal: every point has favor 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFavor;

impl FavorSource for NoFavor {
    fn favor_of(&self, _point: PointId) -> f64 {
        0.0
    }
}

/// Fixed favorability table.
#[derive(Debug, Clone, Default)]
pub struct StaticFavor {
    favor: BTreeMap<PointId, f64>,
}

impl StaticFavor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, point: PointId, favor: f64) -> Self {
        self.favor.insert(point, favor);
        self
    }
}

impl FavorSource for StaticFavor {
    fn favor_of(&self, point: PointId) -> f64 {
        self.favor.get(&point).copied().unwrap_or(0.0)
    }
}

// =============================================================================
// CLOCK
// =============================================================================

/// Source of "now" for row timestamps and earnings windows.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used for replays and tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = instant;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

//! # Restake Cap Reconciler
//!
//! Restakes may not exceed their owner's endorsement of the point. The
//! engines check this when a restake is written, but endorsements can shrink
//! afterwards; the reconciler sweeps restakes and clamps the ones that no
//! longer fit.
//!
//! Each clamp, its history row and its compensating RESTAKE event commit in
//! one transaction. Endorsement totals are summed per restake inside that
//! transaction, so a failure to read them aborts the sweep instead of being
//! treated as zero.

use crate::collaborators::{Clock, SystemClock};
use crate::events::CredEventLog;
use crate::storage::{LedgerRead, LedgerStore};
use crate::{
    Cred, CredEvent, CredEventKind, LedgerResult, PointId, RestakeHistory, RestakeId, StakeAction,
    UserId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Outcome of [`CapReconciler::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestakeValidation {
    pub valid: bool,
    pub max_allowed: Cred,
    pub endorse_amount: Cred,
}

/// One restake clamped by a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapAdjustment {
    pub restake_id: RestakeId,
    pub user_id: UserId,
    pub point_id: PointId,
    pub negation_id: PointId,
    pub previous_amount: Cred,
    pub new_amount: Cred,
    /// Positive amount removed from the restake.
    pub clawed_back: Cred,
}

/// Outcome of [`CapReconciler::enforce`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapReport {
    pub success: bool,
    pub message: String,
    pub adjustments: Vec<CapAdjustment>,
}

/// Sweeps restakes back under their endorsement ceiling.
pub struct CapReconciler {
    store: Arc<LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CapReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapReconciler")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl CapReconciler {
    #[must_use]
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Check a proposed restake amount against the user's endorsement.
    pub fn validate(
        &self,
        user: UserId,
        point: PointId,
        proposed: Cred,
    ) -> LedgerResult<RestakeValidation> {
        let endorse_amount = self.store.read(|tx| tx.endorsement_total(user, point))?;
        Ok(RestakeValidation {
            valid: proposed >= 0 && proposed <= endorse_amount,
            max_allowed: endorse_amount,
            endorse_amount,
        })
    }

    /// Clamp every active restake (optionally filtered by user and point)
    /// down to its owner's current endorsement total.
    ///
    /// Never returns an error: infrastructure failures become
    /// `success: false` with the adjustments committed before the failure.
    pub fn enforce(&self, user: Option<UserId>, point: Option<PointId>) -> CapReport {
        let mut adjustments = Vec::new();
        match self.sweep(user, point, &mut adjustments) {
            Ok(()) => {
                let message = if adjustments.is_empty() {
                    "all restakes within endorsement cap".to_string()
                } else {
                    format!("clamped {} restakes", adjustments.len())
                };
                tracing::info!(adjusted = adjustments.len(), "restake cap enforced");
                CapReport {
                    success: true,
                    message,
                    adjustments,
                }
            }
            Err(e) => {
                tracing::error!(error = %e, adjusted = adjustments.len(), "restake cap enforcement failed");
                CapReport {
                    success: false,
                    message: e.to_string(),
                    adjustments,
                }
            }
        }
    }

    fn sweep(
        &self,
        user: Option<UserId>,
        point: Option<PointId>,
        adjustments: &mut Vec<CapAdjustment>,
    ) -> LedgerResult<()> {
        let candidates: Vec<RestakeId> = self.store.read(|tx| {
            Ok(tx
                .restakes()?
                .into_iter()
                .filter(|r| r.amount > 0)
                .filter(|r| user.is_none_or(|u| r.user_id == u))
                .filter(|r| point.is_none_or(|p| r.point_id == p))
                .map(|r| r.id)
                .collect())
        })?;

        for id in candidates {
            if let Some(adjustment) = self.clamp(id)? {
                adjustments.push(adjustment);
            }
        }
        Ok(())
    }

    /// Re-read one restake and clamp it if it exceeds the endorsement total.
    fn clamp(&self, id: RestakeId) -> LedgerResult<Option<CapAdjustment>> {
        let now = self.clock.now();
        self.store.write(|tx| {
            let Some(mut restake) = tx.restake(id)? else {
                return Ok(None);
            };
            let endorsed = tx.endorsement_total(restake.user_id, restake.point_id)?;
            if restake.amount <= endorsed {
                return Ok(None);
            }

            let previous = restake.amount;
            let clamped = endorsed.max(0);
            let clawed_back = previous - clamped;
            restake.amount = clamped;
            tx.put_restake(&restake)?;
            tx.append_restake_history(&RestakeHistory {
                restake_id: restake.id,
                user_id: restake.user_id,
                action: StakeAction::classify(previous, clamped),
                previous_amount: Some(previous),
                new_amount: clamped,
                generation: restake.generation,
                created_at: now,
            })?;
            CredEventLog::record_in(
                tx,
                &CredEvent::new(
                    restake.user_id,
                    restake.point_id,
                    CredEventKind::Restake,
                    -clawed_back,
                    now,
                ),
            )?;

            tracing::debug!(
                restake = %restake.id,
                previous,
                clamped,
                "restake clamped to endorsement"
            );
            Ok(Some(CapAdjustment {
                restake_id: restake.id,
                user_id: restake.user_id,
                point_id: restake.point_id,
                negation_id: restake.negation_id,
                previous_amount: previous,
                new_amount: clamped,
                clawed_back,
            }))
        })
    }
}

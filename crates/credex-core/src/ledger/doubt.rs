//! Doubt engine.
//!
//! Doubts only grow. Each increase first pays out what the existing doubt
//! has accrued since its last payout, bounded by the endorsement pool that
//! backed the doubted restakes when the doubt was placed.

use super::slash::backs;
use super::{Ledger, authenticated, non_negative};
use crate::collaborators::Identity;
use crate::primitives::{DOUBT_APY, FAVOR_EPSILON, HOURS_PER_YEAR, SEQ_DOUBT};
use crate::state::StakeState;
use crate::storage::{LedgerRead, WriteTx};
use crate::{
    Cred, Doubt, DoubtAction, DoubtHistory, DoubtId, LedgerError, LedgerResult, PointId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of a successful [`Ledger::doubt`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoubtOutcome {
    pub doubt_id: DoubtId,
    /// Cred paid out for the existing doubt before the increase.
    pub earnings: Cred,
}

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Accrued earnings of a doubt of `amount` held for `hours` against a point
/// of favorability `favor`, capped by `available` endorsement cred.
///
/// `hourly = exp(ln(APY) + ln(favor + ε)) * amount / hours_per_year`
#[must_use]
pub fn doubt_earnings(favor: f64, amount: Cred, hours: f64, available: Cred) -> Cred {
    if amount <= 0 || hours <= 0.0 || available <= 0 {
        return 0;
    }
    let favor = favor.max(0.0);
    let hourly = (DOUBT_APY.ln() + (favor + FAVOR_EPSILON).ln()).exp() * amount as f64
        / HOURS_PER_YEAR;
    (hourly * hours).min(available as f64).round() as Cred
}

impl Ledger {
    /// Place or increase the caller's doubt on `(point, negation)`.
    ///
    /// Returns `None` for a zero amount when there is nothing to increase.
    pub fn doubt(
        &self,
        identity: &dyn Identity,
        point: PointId,
        negation: PointId,
        amount: Cred,
    ) -> LedgerResult<Option<DoubtOutcome>> {
        let user = authenticated(identity)?;
        let amount = non_negative(amount)?;
        let space = identity.current_space();
        let now = self.clock.now();
        let favor = self.favor.favor_of(negation);

        let written = self.store.write(|tx| {
            let existing = tx.doubt_for(user, point, negation)?;
            if let Some(current) = existing.as_ref().map(|d| d.amount).filter(|a| *a > 0) {
                if amount <= current {
                    return Err(LedgerError::DoubtMustIncrease {
                        current,
                        requested: amount,
                    });
                }
            }
            if amount == 0 {
                return Ok(None);
            }
            let owner = tx
                .point(point)?
                .ok_or(LedgerError::PointNotFound(point))?
                .created_by;

            let Some(mut doubt) = existing else {
                tx.adjust_balance(user, -amount)?;
                let doubt = Doubt {
                    id: DoubtId(tx.next_id(SEQ_DOUBT)?),
                    user_id: user,
                    point_id: point,
                    negation_id: negation,
                    amount,
                    last_earnings_at: now,
                    created_at: now,
                    space,
                };
                tx.put_doubt(&doubt)?;
                tx.append_doubt_history(&DoubtHistory {
                    doubt_id: doubt.id,
                    user_id: user,
                    action: DoubtAction::Created,
                    previous_amount: None,
                    new_amount: amount,
                    created_at: now,
                })?;
                return Ok(Some((doubt, 0, owner)));
            };

            let previous = doubt.amount;
            let earnings = if previous > 0 {
                accrued_earnings(tx, &doubt, favor, now)?
            } else {
                0
            };
            tx.adjust_balance(user, earnings - (amount - previous))?;

            let slashed = slashed_against(tx, &doubt)?;
            let action = if StakeState::of(previous, slashed).is_exhausted() {
                doubt.created_at = now;
                DoubtAction::Created
            } else {
                DoubtAction::Increased
            };
            doubt.last_earnings_at = now;
            doubt.amount = amount;
            tx.put_doubt(&doubt)?;
            tx.append_doubt_history(&DoubtHistory {
                doubt_id: doubt.id,
                user_id: user,
                action,
                previous_amount: Some(previous),
                new_amount: amount,
                created_at: now,
            })?;
            Ok(Some((doubt, earnings, owner)))
        })?;

        let Some((doubt, earnings, owner)) = written else {
            return Ok(None);
        };
        self.dispatch("doubt", self.notifier.notify_doubt(&doubt, owner));
        tracing::debug!(
            user = %user,
            doubt = %doubt.id,
            amount = doubt.amount,
            earnings,
            "doubt written"
        );
        Ok(Some(DoubtOutcome {
            doubt_id: doubt.id,
            earnings,
        }))
    }
}

/// Earnings owed to `doubt` at `now`.
///
/// The pool is the cred endorsed on the point, no later than the doubt's
/// `created_at`, by users whose restake on the pair was active by then.
fn accrued_earnings(
    tx: &WriteTx,
    doubt: &Doubt,
    favor: f64,
    now: DateTime<Utc>,
) -> LedgerResult<Cred> {
    let cutoff = doubt.created_at;
    let mut available: Cred = 0;
    for restake in tx.restakes_on_pair(doubt.point_id, doubt.negation_id)? {
        if restake.amount > 0 && restake.created_at <= cutoff {
            available += tx.endorsement_total_until(restake.user_id, doubt.point_id, cutoff)?;
        }
    }
    let hours = (now - doubt.last_earnings_at).num_milliseconds() as f64 / MILLIS_PER_HOUR;
    Ok(doubt_earnings(favor, doubt.amount, hours, available))
}

/// Cumulative slashed cred against the restakes that back `doubt`.
fn slashed_against(tx: &WriteTx, doubt: &Doubt) -> LedgerResult<Cred> {
    let pair = tx.restakes_on_pair(doubt.point_id, doubt.negation_id)?;
    let mut total = 0;
    for restake in pair.iter().filter(|r| backs(&pair, r, doubt.created_at)) {
        if let Some(slash) = tx.slash_for_restake(restake.id)? {
            total += slash.amount;
        }
    }
    Ok(total)
}

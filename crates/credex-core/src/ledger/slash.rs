//! Slash engine.
//!
//! Slashing costs the restaker nothing directly. It withdraws part of the
//! restake and passes a proportional loss on to the doubts that were placed
//! against the current restake incarnation.

use super::{Ledger, authenticated, non_negative};
use crate::collaborators::Identity;
use crate::primitives::SEQ_SLASH;
use crate::storage::{LedgerRead, WriteTx};
use crate::{
    Cred, CredEvent, CredEventKind, Doubt, DoubtAction, DoubtHistory, LedgerError, LedgerResult,
    PointId, Restake, Slash, SlashHistory, SlashId, StakeAction,
};
use chrono::{DateTime, Utc};

impl Ledger {
    /// Slash the caller's active restake on `(point, negation)` by `amount`.
    ///
    /// A slash taken against an older restake generation is replaced by
    /// `amount`; otherwise `amount` accumulates onto the existing total.
    pub fn slash(
        &self,
        identity: &dyn Identity,
        point: PointId,
        negation: PointId,
        amount: Cred,
    ) -> LedgerResult<SlashId> {
        let user = authenticated(identity)?;
        let amount = non_negative(amount)?;
        let space = identity.current_space();
        let now = self.clock.now();

        let (slash, reductions) = self.store.write(|tx| {
            let restake = tx
                .restake_for(user, point, negation)?
                .filter(|r| r.amount > 0)
                .ok_or(LedgerError::NoActiveRestake)?;
            if amount > restake.amount {
                return Err(LedgerError::SlashExceedsRestake {
                    requested: amount,
                    available: restake.amount,
                });
            }
            let doubts = live_doubts(tx, &restake)?;

            let Some(mut slash) = tx.slash_for_restake(restake.id)? else {
                let slash = Slash {
                    id: SlashId(tx.next_id(SEQ_SLASH)?),
                    user_id: user,
                    restake_id: restake.id,
                    point_id: point,
                    negation_id: negation,
                    amount,
                    restake_generation: restake.generation,
                    created_at: now,
                    space,
                };
                tx.put_slash(&slash)?;
                let reductions = propagate(tx, &restake, doubts, amount, now)?;
                tx.append_slash_history(&SlashHistory {
                    slash_id: slash.id,
                    user_id: user,
                    action: StakeAction::Created,
                    previous_amount: None,
                    new_amount: amount,
                    created_at: now,
                })?;
                return Ok((slash, reductions));
            };

            let previous = slash.amount;
            let replaces = slash.restake_generation != restake.generation;
            let total = if replaces { amount } else { previous + amount };
            if total > restake.amount {
                return Err(LedgerError::SlashExceedsRestake {
                    requested: total,
                    available: restake.amount,
                });
            }

            let action = if previous == 0 {
                if total > 0 {
                    slash.created_at = now;
                }
                StakeAction::Created
            } else {
                StakeAction::classify(previous, total)
            };
            slash.amount = total;
            slash.restake_generation = restake.generation;
            tx.put_slash(&slash)?;

            let increment = (total - previous).max(0);
            let reductions = propagate(tx, &restake, doubts, increment, now)?;
            tx.append_slash_history(&SlashHistory {
                slash_id: slash.id,
                user_id: user,
                action,
                previous_amount: Some(previous),
                new_amount: total,
                created_at: now,
            })?;
            Ok((slash, reductions))
        })?;

        self.events
            .append(CredEvent::new(user, point, CredEventKind::Slash, 0, now));
        for (doubt, reduction) in &reductions {
            self.dispatch(
                "doubt_reduction",
                self.notifier.notify_doubt_reduction(doubt, *reduction),
            );
        }
        if slash.amount > 0 {
            self.dispatch("slash", self.notifier.notify_slash(&slash));
        }
        tracing::debug!(
            user = %user,
            slash = %slash.id,
            amount = slash.amount,
            doubts_reduced = reductions.len(),
            "slash written"
        );
        Ok(slash.id)
    }
}

/// Doubts on the restake's pair placed during the current incarnation: at or
/// after `restake.created_at` and before any newer restake on the pair.
fn live_doubts(tx: &WriteTx, restake: &Restake) -> LedgerResult<Vec<Doubt>> {
    let pair = tx.restakes_on_pair(restake.point_id, restake.negation_id)?;
    let mut doubts: Vec<Doubt> = tx
        .doubts_on_pair(restake.point_id, restake.negation_id)?
        .into_iter()
        .filter(|d| d.amount > 0 && backs(&pair, restake, d.created_at))
        .collect();
    doubts.sort_by_key(|d| d.id);
    Ok(doubts)
}

/// Whether `restake` is the incarnation a doubt placed at `at` was placed
/// against: created no later than `at`, with no other restake on the pair
/// created in between.
pub(super) fn backs(pair: &[Restake], restake: &Restake, at: DateTime<Utc>) -> bool {
    at >= restake.created_at
        && pair
            .iter()
            .filter(|r| r.id != restake.id && r.created_at > restake.created_at)
            .all(|r| at < r.created_at)
}

/// Reduction owed by a doubt of `doubt_amount` when `slashed` of `restaked`
/// is withdrawn: `round(doubt_amount * slashed / restaked)`, capped at the
/// doubt itself.
#[must_use]
pub fn slash_reduction(doubt_amount: Cred, slashed: Cred, restaked: Cred) -> Cred {
    if restaked <= 0 || slashed <= 0 || doubt_amount <= 0 {
        return 0;
    }
    let proportion = slashed as f64 / restaked as f64;
    let reduction = (doubt_amount as f64 * proportion).round() as Cred;
    reduction.clamp(0, doubt_amount)
}

/// Apply `increment` of slashing to `doubts`. The running total of
/// reductions never exceeds `increment`.
fn propagate(
    tx: &WriteTx,
    restake: &Restake,
    doubts: Vec<Doubt>,
    increment: Cred,
    now: DateTime<Utc>,
) -> LedgerResult<Vec<(Doubt, Cred)>> {
    let mut remaining = increment;
    let mut reduced = Vec::new();
    for mut doubt in doubts {
        let reduction = slash_reduction(doubt.amount, increment, restake.amount).min(remaining);
        if reduction <= 0 {
            continue;
        }
        remaining -= reduction;
        let previous = doubt.amount;
        doubt.amount -= reduction;
        tx.put_doubt(&doubt)?;
        tx.append_doubt_history(&DoubtHistory {
            doubt_id: doubt.id,
            user_id: doubt.user_id,
            action: DoubtAction::ReducedBySlash,
            previous_amount: Some(previous),
            new_amount: doubt.amount,
            created_at: now,
        })?;
        reduced.push((doubt, reduction));
    }
    Ok(reduced)
}

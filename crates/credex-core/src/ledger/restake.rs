//! Restake engine.
//!
//! A restake is "if `negation` turns out true, I withdraw `amount` of my
//! support from `point`". One row exists per (user, point, negation);
//! later calls edit it in place:
//!
//! - any edit wipes an active slash on the row
//! - editing an exhausted row is a reuse: `created_at` moves to now so doubt
//!   earnings only see endorsements from the new commitment onwards
//! - every edit bumps `generation`

use super::{Ledger, authenticated, non_negative};
use crate::collaborators::Identity;
use crate::primitives::SEQ_RESTAKE;
use crate::state::StakeState;
use crate::storage::LedgerRead;
use crate::{
    Cred, CredEvent, CredEventKind, LedgerError, LedgerResult, PointId, Restake, RestakeHistory,
    RestakeId, SlashHistory, StakeAction,
};

impl Ledger {
    /// Create or update the caller's restake on `(point, negation)`.
    pub fn restake(
        &self,
        identity: &dyn Identity,
        point: PointId,
        negation: PointId,
        amount: Cred,
    ) -> LedgerResult<RestakeId> {
        let user = authenticated(identity)?;
        let amount = non_negative(amount)?;
        let space = identity.current_space();
        let now = self.clock.now();

        let (restake, delta) = self.store.write(|tx| {
            if tx.point(point)?.is_none() {
                return Err(LedgerError::PointNotFound(point));
            }
            if tx.point(negation)?.is_none() {
                return Err(LedgerError::PointNotFound(negation));
            }
            let available = tx.endorsement_total(user, point)?;
            if amount > available {
                return Err(LedgerError::RestakeExceedsEndorsement {
                    requested: amount,
                    available,
                });
            }

            let Some(mut restake) = tx.restake_for(user, point, negation)? else {
                let restake = Restake {
                    id: RestakeId(tx.next_id(SEQ_RESTAKE)?),
                    user_id: user,
                    point_id: point,
                    negation_id: negation,
                    amount,
                    generation: 1,
                    created_at: now,
                    space,
                };
                tx.put_restake(&restake)?;
                tx.append_restake_history(&RestakeHistory {
                    restake_id: restake.id,
                    user_id: user,
                    action: StakeAction::Created,
                    previous_amount: None,
                    new_amount: amount,
                    generation: restake.generation,
                    created_at: now,
                })?;
                return Ok((restake, amount));
            };

            let previous = restake.amount;
            let slash = tx.slash_for_restake(restake.id)?;
            let slashed = slash.as_ref().map_or(0, |s| s.amount);
            let state = StakeState::of(previous, slashed);

            if let Some(mut slash) = slash.filter(|s| s.amount > 0) {
                let prior = slash.amount;
                slash.amount = 0;
                tx.put_slash(&slash)?;
                tx.append_slash_history(&SlashHistory {
                    slash_id: slash.id,
                    user_id: user,
                    action: StakeAction::Deactivated,
                    previous_amount: Some(prior),
                    new_amount: 0,
                    created_at: now,
                })?;
            }

            let action = if state.is_exhausted() {
                restake.created_at = now;
                StakeAction::Created
            } else {
                StakeAction::classify(previous, amount)
            };
            restake.amount = amount;
            restake.generation += 1;
            tx.put_restake(&restake)?;
            tx.append_restake_history(&RestakeHistory {
                restake_id: restake.id,
                user_id: user,
                action,
                previous_amount: Some(previous),
                new_amount: amount,
                generation: restake.generation,
                created_at: now,
            })?;
            Ok((restake, amount - previous))
        })?;

        self.events.append(CredEvent::new(
            user,
            point,
            CredEventKind::Restake,
            delta,
            now,
        ));
        if restake.amount > 0 {
            self.dispatch("restake", self.notifier.notify_restake(&restake));
        }
        tracing::debug!(
            user = %user,
            restake = %restake.id,
            amount = restake.amount,
            delta,
            generation = restake.generation,
            "restake written"
        );
        Ok(restake.id)
    }
}

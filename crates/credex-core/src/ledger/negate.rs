//! Negate engine.

use super::{Ledger, authenticated, non_negative};
use crate::collaborators::Identity;
use crate::storage::LedgerRead;
use crate::{Cred, LedgerError, LedgerResult, Negation, NegationId, PointId};

impl Ledger {
    /// Record that `counterpoint` rebuts `negated`.
    ///
    /// When `cred > 0` the caller also endorses the counterpoint with that
    /// amount. The negation is get-or-create on the canonical pair, so
    /// negating an already negated pair returns the existing id.
    pub fn negate(
        &self,
        identity: &dyn Identity,
        negated: PointId,
        counterpoint: PointId,
        cred: Cred,
    ) -> LedgerResult<NegationId> {
        self.record_negation(identity, negated, counterpoint, cred, false)
    }

    /// Like [`negate`](Self::negate), flagging the negation as an objection.
    pub fn object(
        &self,
        identity: &dyn Identity,
        negated: PointId,
        counterpoint: PointId,
        cred: Cred,
    ) -> LedgerResult<NegationId> {
        self.record_negation(identity, negated, counterpoint, cred, true)
    }

    fn record_negation(
        &self,
        identity: &dyn Identity,
        negated: PointId,
        counterpoint: PointId,
        cred: Cred,
        is_objection: bool,
    ) -> LedgerResult<NegationId> {
        let user = authenticated(identity)?;
        let cred = non_negative(cred)?;
        if negated == counterpoint {
            return Err(LedgerError::InvalidNegation(negated));
        }
        let space = identity.current_space();
        let now = self.clock.now();
        let (older, newer) = Negation::canonical_pair(negated, counterpoint);

        let (id, created) = self.store.write(|tx| {
            for point in [negated, counterpoint] {
                if tx.point(point)?.is_none() {
                    return Err(LedgerError::PointNotFound(point));
                }
            }
            if cred > 0 {
                tx.adjust_balance(user, -cred)?;
                tx.insert_endorsement(user, counterpoint, cred, now, space.clone())?;
            }
            tx.insert_negation_if_absent(older, newer, user, is_objection, now, space)
        })?;

        tracing::debug!(
            user = %user,
            older = %older,
            newer = %newer,
            negation = %id,
            created,
            "negation recorded"
        );
        Ok(id)
    }
}

//! # Ledger Engines
//!
//! The four ledger-mutating operations and the endorsement bookkeeping they
//! build on:
//!
//! - [`Ledger::negate`]: record a rebuttal, optionally bundling an endorsement
//! - [`Ledger::restake`]: counter-stake tied to an endorsement
//! - [`Ledger::slash`]: retract a restake, propagating loss to doubts
//! - [`Ledger::doubt`]: bet that a restake will be honored
//!
//! Each operation resolves the caller through an [`Identity`], then performs
//! its balance change, row changes and audit history inside one write
//! transaction. Cred events and notifications follow the commit and never
//! fail the operation.

mod doubt;
mod negate;
mod restake;
mod slash;

pub use doubt::{DoubtOutcome, doubt_earnings};
pub use slash::slash_reduction;

use crate::collaborators::{
    Clock, FavorSource, Identity, NoFavor, Notifier, SystemClock, TracingNotifier,
};
use crate::events::CredEventLog;
use crate::storage::{LedgerRead, LedgerStore};
use crate::{Cred, CredEvent, CredEventKind, EndorsementId, LedgerError, LedgerResult, PointId, UserId};
use std::sync::Arc;

/// Entry point for all ledger mutations.
pub struct Ledger {
    store: Arc<LedgerStore>,
    events: CredEventLog,
    notifier: Arc<dyn Notifier>,
    favor: Arc<dyn FavorSource>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Create a ledger with the default collaborators: tracing notifications,
    /// no favorability signal and the system clock.
    #[must_use]
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self {
            events: CredEventLog::new(Arc::clone(&store)),
            store,
            notifier: Arc::new(TracingNotifier),
            favor: Arc::new(NoFavor),
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn with_favor(mut self, favor: Arc<dyn FavorSource>) -> Self {
        self.favor = favor;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    /// Stake `cred` on a point: debit, insert an endorsement row and record
    /// an ENDORSE event.
    pub fn endorse(
        &self,
        identity: &dyn Identity,
        point: PointId,
        cred: Cred,
    ) -> LedgerResult<EndorsementId> {
        let user = authenticated(identity)?;
        if cred <= 0 {
            return Err(LedgerError::InvalidAmount(cred));
        }
        let space = identity.current_space();
        let now = self.clock.now();

        let id = self.store.write(|tx| {
            if tx.point(point)?.is_none() {
                return Err(LedgerError::PointNotFound(point));
            }
            tx.adjust_balance(user, -cred)?;
            tx.insert_endorsement(user, point, cred, now, space)
                .map(|e| e.id)
        })?;

        self.events
            .append(CredEvent::new(user, point, CredEventKind::Endorse, cred, now));
        tracing::debug!(user = %user, point = %point, cred, "endorsed");
        Ok(id)
    }

    /// Withdraw up to `cred` of the caller's endorsement on a point, newest
    /// rows first, refunding the balance. Returns the amount refunded.
    ///
    /// Restakes are not touched: an endorsement reduced below a restake is
    /// clamped by the cap reconciler.
    pub fn unendorse(
        &self,
        identity: &dyn Identity,
        point: PointId,
        cred: Cred,
    ) -> LedgerResult<Cred> {
        let user = authenticated(identity)?;
        if cred <= 0 {
            return Err(LedgerError::InvalidAmount(cred));
        }
        let now = self.clock.now();

        let refunded = self.store.write(|tx| {
            let mut rows = tx.endorsements(user, point)?;
            rows.sort_by(|a, b| b.id.cmp(&a.id));

            let mut remaining = cred;
            for mut row in rows {
                if remaining == 0 {
                    break;
                }
                let taken = row.cred.min(remaining);
                remaining -= taken;
                if taken == row.cred {
                    tx.remove_endorsement(&row)?;
                } else {
                    row.cred -= taken;
                    tx.put_endorsement(&row)?;
                }
            }
            let refunded = cred - remaining;
            if refunded > 0 {
                tx.adjust_balance(user, refunded)?;
            }
            Ok(refunded)
        })?;

        if refunded > 0 {
            self.events.append(CredEvent::new(
                user,
                point,
                CredEventKind::Endorse,
                -refunded,
                now,
            ));
        }
        Ok(refunded)
    }

    fn dispatch(&self, what: &'static str, result: LedgerResult<()>) {
        if let Err(e) = result {
            tracing::warn!(error = %e, notification = what, "notification dispatch failed");
        }
    }
}

/// Resolve the caller or fail with [`LedgerError::Unauthenticated`].
fn authenticated(identity: &dyn Identity) -> LedgerResult<UserId> {
    identity
        .current_user_id()
        .ok_or(LedgerError::Unauthenticated)
}

/// Amounts are whole, non-negative cred.
fn non_negative(amount: Cred) -> LedgerResult<Cred> {
    if amount < 0 {
        Err(LedgerError::InvalidAmount(amount))
    } else {
        Ok(amount)
    }
}

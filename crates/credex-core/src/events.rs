//! # Cred Event Log
//!
//! Append-only record of every balance-affecting action. The analytics
//! pipeline reads nothing else.
//!
//! Appends made after an engine's transaction has committed are
//! best-effort: a failure is logged and swallowed, never surfaced to the
//! caller of the mutation. The reconciler instead records its compensating
//! events inside the clamp transaction with [`CredEventLog::record_in`].

use crate::storage::{LedgerStore, WriteTx};
use crate::{CredEvent, LedgerResult};
use std::sync::Arc;

/// Writer for the `cred_events` table.
#[derive(Debug, Clone)]
pub struct CredEventLog {
    store: Arc<LedgerStore>,
}

impl CredEventLog {
    #[must_use]
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }

    /// Append one event in its own transaction.
    ///
    /// Returns whether the event was durably recorded.
    pub fn append(&self, event: CredEvent) -> bool {
        match self.store.write(|tx| tx.append_event(&event)) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    user = %event.user_id,
                    point = %event.point_id,
                    kind = event.kind.as_str(),
                    amount = event.amount,
                    "failed to record cred event"
                );
                false
            }
        }
    }

    /// Append a batch of events in one transaction. All or nothing.
    pub fn append_batch(&self, events: &[CredEvent]) -> bool {
        if events.is_empty() {
            return true;
        }
        let result = self.store.write(|tx| {
            for event in events {
                tx.append_event(event)?;
            }
            Ok(())
        });
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, count = events.len(), "failed to record cred events");
                false
            }
        }
    }

    /// Record an event as part of an enclosing write transaction.
    ///
    /// Unlike [`append`](Self::append), a failure here aborts the caller's
    /// transaction.
    pub fn record_in(tx: &WriteTx, event: &CredEvent) -> LedgerResult<()> {
        tx.append_event(event)
    }
}

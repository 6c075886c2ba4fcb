//! # Stake Lifecycle
//!
//! Restakes, slashes and doubts are reused across their lifecycle instead of
//! being re-created. Whether a row is live or reusable is derived once here.
//!
//! ```text
//!   Active(amount) --full slash / deactivation--> Exhausted
//!   Exhausted      --reuse (resets created_at)--> Active(amount)
//! ```

use crate::Cred;

/// Lifecycle state of a stake row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeState {
    /// The row still carries `amount` of unslashed commitment.
    Active(Cred),
    /// Fully slashed or zeroed. The next write re-creates it.
    Exhausted,
}

impl StakeState {
    /// Derive the state of a row holding `amount`, of which `slashed` has
    /// been withdrawn.
    #[must_use]
    pub fn of(amount: Cred, slashed: Cred) -> Self {
        if amount <= 0 || slashed >= amount {
            Self::Exhausted
        } else {
            Self::Active(amount)
        }
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted)
    }

    /// Amount still committed, zero when exhausted.
    #[must_use]
    pub fn live_amount(&self) -> Cred {
        match self {
            Self::Active(amount) => *amount,
            Self::Exhausted => 0,
        }
    }
}

//! Escrow hold types for OpenTask
//!
//! A hold earmarks a poster's funds for one task until settlement. Exactly
//! one terminal operation (release, capture, or split) applies per hold;
//! the settlement record stores the idempotency key so a retried operation
//! replays the recorded outcome instead of moving funds twice.

use crate::{AgentId, Amount, HoldId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-supplied token making escrow operations replay-safe
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(pub String);

impl IdempotencyKey {
    /// Create a key from an arbitrary token
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derive the canonical key for a lifecycle operation on a task
    ///
    /// All retries of the same logical operation on the same task derive
    /// the same key, so none of them can double-apply.
    pub fn for_task(task_id: &TaskId, operation: &str) -> Self {
        Self(format!("{}:{}", operation, task_id))
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of an escrow hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HoldStatus {
    /// Funds are locked against the payer's account
    Held,
    /// Funds returned to the payer
    Released,
    /// Full amount paid to a single payee
    Captured,
    /// Amount divided between worker and payer
    Split {
        /// Share paid to the worker, 0-100
        worker_pct: u8,
    },
}

impl HoldStatus {
    /// Check if this is a terminal status
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Held)
    }
}

/// The terminal operation applied to a hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementKind {
    /// Returned to the payer
    Release,
    /// Paid in full to a single payee
    Capture,
    /// Divided between worker and payer
    Split {
        /// Share paid to the worker, 0-100
        worker_pct: u8,
    },
}

/// Record of how a hold was settled
///
/// Stored on the hold so a retried operation under the same key returns
/// this record instead of re-applying the payout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Which terminal operation applied
    pub kind: SettlementKind,
    /// Key the operation was applied under
    pub key: IdempotencyKey,
    /// Payout legs; these sum exactly to the held amount
    pub legs: Vec<(AgentId, Amount)>,
    /// When the settlement was applied
    pub applied_at: DateTime<Utc>,
}

impl Settlement {
    /// Total paid out across all legs
    pub fn total(&self) -> Amount {
        Amount::new(self.legs.iter().map(|(_, amount)| amount.0).sum())
    }

    /// Amount paid to a specific party, zero if absent from the legs
    pub fn paid_to(&self, party: &AgentId) -> Amount {
        Amount::new(
            self.legs
                .iter()
                .filter(|(agent, _)| agent == party)
                .map(|(_, amount)| amount.0)
                .sum(),
        )
    }
}

/// Funds earmarked against a poster's account for one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowHold {
    /// Unique hold ID
    pub id: HoldId,
    /// Task the hold backs
    pub task_id: TaskId,
    /// Account the funds were taken from
    pub payer: AgentId,
    /// Held amount (the task reward at hold time)
    pub amount: Amount,
    /// Current status
    pub status: HoldStatus,
    /// Key that created the hold; replayed hold calls match against it
    pub created_key: IdempotencyKey,
    /// Terminal settlement, once one has applied
    pub settlement: Option<Settlement>,
    /// When the hold was taken
    pub created_at: DateTime<Utc>,
}

impl EscrowHold {
    /// Check if the hold has reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

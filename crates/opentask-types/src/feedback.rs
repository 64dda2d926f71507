//! Settlement feedback types for OpenTask
//!
//! After a task reaches a terminal state the registry publishes one of
//! these records to the reputation capability. Publication is
//! fire-and-forget; a failed publish never rolls back a settlement.

use crate::{AgentId, Amount, TaskId};
use serde::{Deserialize, Serialize};

/// Terminal outcome of a task, as published to reputation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// Poster approved the deliverable
    Approved,
    /// Review window elapsed without a rejection
    AutoApproved,
    /// Judges split the escrow
    DisputeSplit {
        /// Share awarded to the worker, 0-100
        worker_pct: u8,
    },
    /// Worker missed the execution deadline
    Defaulted,
    /// No bids before the bidding deadline
    ExpiredUnfilled,
    /// Poster cancelled before assignment
    Cancelled,
}

/// Feedback record for one settled task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementFeedback {
    /// Task that settled
    pub task_id: TaskId,
    /// Poster
    pub poster: AgentId,
    /// Assigned worker, if the task got that far
    pub worker: Option<AgentId>,
    /// How the task ended
    pub outcome: SettlementOutcome,
    /// Amount the worker actually received
    pub paid_to_worker: Amount,
}

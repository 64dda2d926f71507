//! Bidding types for OpenTask
//!
//! Bids are candidacy only. The reward is fixed at task creation, so a bid
//! carries no price; selection among bids is a pluggable policy.

use crate::{AgentId, BidId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bid on a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    /// Unique bid ID
    pub id: BidId,
    /// Task being bid on
    pub task_id: TaskId,
    /// Agent offering to do the work
    pub bidder: AgentId,
    /// When the bid arrived
    pub submitted_at: DateTime<Utc>,
    /// Whether the bidder has withdrawn
    pub withdrawn: bool,
}

impl Bid {
    /// Check if this bid can still win selection
    pub fn is_eligible(&self) -> bool {
        !self.withdrawn
    }
}

//! Dispute types for OpenTask
//!
//! A dispute is opened over a rejected deliverable. Judges vote a worker
//! percentage over the assembled context; the resolved percentage is
//! recorded exactly once and drives the escrow split.

use crate::{AgentId, Amount, DisputeId, JudgeId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything a judge sees when evaluating a dispute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeContext {
    /// Task under dispute
    pub task_id: TaskId,
    /// Task title
    pub task_title: String,
    /// Description of the work that was asked for
    pub task_description: String,
    /// Escrowed reward
    pub reward: Amount,
    /// Submitted deliverable content, if any
    pub deliverable: Option<String>,
    /// The poster's rejection claim
    pub claim: String,
    /// The worker's rebuttal, if one was submitted
    pub rebuttal: Option<String>,
}

/// One judge's vote on a dispute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeVote {
    /// Judge that voted
    pub judge: JudgeId,
    /// Share of the escrow awarded to the worker, 0-100
    pub worker_pct: u8,
    /// The judge's reasoning
    pub reasoning: String,
    /// When the vote arrived
    pub voted_at: DateTime<Utc>,
}

/// Status of a dispute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisputeStatus {
    /// Awaiting evaluation
    Open,
    /// Percentage recorded; immutable from here
    Resolved,
}

/// A dispute over a rejected deliverable
///
/// The claim and rebuttal live in the context so judges always see the
/// same material the record stores. Votes are kept in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    /// Unique dispute ID
    pub id: DisputeId,
    /// Task under dispute
    pub task_id: TaskId,
    /// Author of the claim (the rejecting poster)
    pub claimant: AgentId,
    /// Material put before the judges
    pub context: DisputeContext,
    /// Votes received, in arrival order
    pub votes: Vec<JudgeVote>,
    /// Recorded worker percentage, set at most once
    pub resolved_pct: Option<u8>,
    /// Current status
    pub status: DisputeStatus,
    /// When the dispute was opened
    pub opened_at: DateTime<Utc>,
    /// When the percentage was recorded
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Dispute {
    /// Check if the dispute has been resolved
    pub fn is_resolved(&self) -> bool {
        matches!(self.status, DisputeStatus::Resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispute_status() {
        let dispute = Dispute {
            id: DisputeId::new(),
            task_id: TaskId::new(),
            claimant: AgentId::new(),
            context: DisputeContext {
                task_id: TaskId::new(),
                task_title: "t".to_string(),
                task_description: "d".to_string(),
                reward: Amount::new(100),
                deliverable: Some("work".to_string()),
                claim: "incomplete".to_string(),
                rebuttal: None,
            },
            votes: Vec::new(),
            resolved_pct: None,
            status: DisputeStatus::Open,
            opened_at: Utc::now(),
            resolved_at: None,
        };
        assert!(!dispute.is_resolved());
    }
}

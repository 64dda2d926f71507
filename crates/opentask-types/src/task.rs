//! Task lifecycle types for OpenTask
//!
//! A task moves through its states exactly once per transition; every hop
//! is appended to the transition log before the new state is visible, and
//! the version stamp is bumped so concurrent writers can detect each other.

use crate::{AgentId, Amount, DisputeId, HoldId, OpenTaskError, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Record accepted; escrow not yet taken
    Created,
    /// Reward held in escrow
    Funded,
    /// Accepting bids until the bidding deadline
    BiddingOpen,
    /// Winner selected
    Assigned,
    /// Worker executing against the execution deadline
    InExecution,
    /// Deliverable submitted; poster review window open
    DeliveredPendingReview,
    /// Poster rejected the deliverable with a claim
    DeliveredRejected,
    /// Dispute filed; awaiting the judges' percentage
    Disputed,
    /// Escrow fully paid out
    Settled,
    /// No bids arrived before the bidding deadline
    ExpiredUnfilled,
    /// Worker missed the execution deadline
    Defaulted,
    /// Poster cancelled before assignment
    Cancelled,
}

impl TaskState {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Settled | Self::ExpiredUnfilled | Self::Defaulted | Self::Cancelled
        )
    }

    /// Canonical storage representation
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Funded => "funded",
            Self::BiddingOpen => "bidding_open",
            Self::Assigned => "assigned",
            Self::InExecution => "in_execution",
            Self::DeliveredPendingReview => "delivered_pending_review",
            Self::DeliveredRejected => "delivered_rejected",
            Self::Disputed => "disputed",
            Self::Settled => "settled",
            Self::ExpiredUnfilled => "expired_unfilled",
            Self::Defaulted => "defaulted",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for TaskState {
    type Error = OpenTaskError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "created" => Ok(Self::Created),
            "funded" => Ok(Self::Funded),
            "bidding_open" => Ok(Self::BiddingOpen),
            "assigned" => Ok(Self::Assigned),
            "in_execution" => Ok(Self::InExecution),
            "delivered_pending_review" => Ok(Self::DeliveredPendingReview),
            "delivered_rejected" => Ok(Self::DeliveredRejected),
            "disputed" => Ok(Self::Disputed),
            "settled" => Ok(Self::Settled),
            "expired_unfilled" => Ok(Self::ExpiredUnfilled),
            "defaulted" => Ok(Self::Defaulted),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(OpenTaskError::validation("task_state", value)),
        }
    }
}

/// Who drove a state transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransitionActor {
    /// An agent action (poster, worker, or a dispute party)
    Agent { id: AgentId },
    /// The deadline sweep
    Scheduler,
    /// An immediate follow-on hop chained by the registry itself
    System,
}

/// One hop in a task's transition log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// When the hop was committed
    pub at: DateTime<Utc>,
    /// State before
    pub from: TaskState,
    /// State after
    pub to: TaskState,
    /// Who drove it
    pub actor: TransitionActor,
}

/// Work product submitted by the assigned worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deliverable {
    /// Worker that submitted
    pub submitted_by: AgentId,
    /// Content or a reference to it
    pub content: String,
    /// When it was submitted
    pub submitted_at: DateTime<Utc>,
}

/// A task record
///
/// The reward is immutable after creation. Deadlines are absolute instants,
/// each set when the task enters the phase the deadline governs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID
    pub id: TaskId,
    /// Agent that posted the task and funded the escrow
    pub poster: AgentId,
    /// Short human-readable title
    pub title: String,
    /// Description of the work
    pub description: String,
    /// Fixed reward, taken into escrow at creation
    pub reward: Amount,
    /// Current lifecycle state
    pub state: TaskState,
    /// When bidding closes (set on entering `BiddingOpen`)
    pub bidding_deadline: Option<DateTime<Utc>>,
    /// When execution must be done (set on assignment)
    pub execution_deadline: Option<DateTime<Utc>>,
    /// When the review window closes (set on delivery)
    pub review_deadline: Option<DateTime<Utc>>,
    /// Winning bidder (set on assignment)
    pub worker: Option<AgentId>,
    /// Escrow hold backing the reward
    pub hold_id: Option<HoldId>,
    /// Submitted work product
    pub deliverable: Option<Deliverable>,
    /// Poster's claim when rejecting the deliverable
    pub rejection_claim: Option<String>,
    /// Dispute over the rejection, if one was filed
    pub dispute_id: Option<DisputeId>,
    /// When the task was created
    pub created_at: DateTime<Utc>,
    /// When the task was last modified
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency stamp, bumped on every committed transition
    pub version: u64,
    /// Append-only log of every committed transition
    pub transitions: Vec<Transition>,
}

impl Task {
    /// Check if the task is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Append a transition hop and move to the new state
    ///
    /// The log entry is recorded before the state field changes so a
    /// committed task always carries the hop that produced its state.
    pub fn record_transition(&mut self, to: TaskState, actor: TransitionActor, at: DateTime<Utc>) {
        self.transitions.push(Transition {
            at,
            from: self.state,
            to,
            actor,
        });
        self.state = to;
        self.version += 1;
        self.updated_at = at;
    }
}

//! Bid ledger: per-task bid collection
//!
//! Bids are kept in submission order per task. An agent holds at most one
//! live bid per task; withdrawing frees the slot for a fresh bid. Withdrawn
//! bids stay in the record for the audit trail but never win selection.

use opentask_types::{AgentId, Bid, BidId, OpenTaskError, Result, TaskId};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory bid store, keyed by task
#[derive(Clone)]
pub struct BidLedger {
    bids: Arc<RwLock<HashMap<TaskId, Vec<Bid>>>>,
}

impl BidLedger {
    pub fn new() -> Self {
        Self {
            bids: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record a bid on a task.
    ///
    /// Rejects a second live bid from the same agent; a withdrawn bid does
    /// not block. Whether the task is actually open for bidding is the
    /// caller's guard, not this ledger's.
    pub async fn place(
        &self,
        task_id: &TaskId,
        bidder: AgentId,
        now: DateTime<Utc>,
    ) -> Result<Bid> {
        let mut bids = self.bids.write().await;
        let task_bids = bids.entry(task_id.clone()).or_default();

        if task_bids
            .iter()
            .any(|b| b.bidder == bidder && b.is_eligible())
        {
            return Err(OpenTaskError::state_conflict(
                task_id.to_prefixed_string(),
                "bid",
                "re-bid",
            ));
        }

        let bid = Bid {
            id: BidId::new(),
            task_id: task_id.clone(),
            bidder,
            submitted_at: now,
            withdrawn: false,
        };
        task_bids.push(bid.clone());

        debug!(task_id = %bid.task_id, bidder = %bid.bidder, "bid placed");
        Ok(bid)
    }

    /// Withdraw an agent's live bid on a task
    pub async fn withdraw(&self, task_id: &TaskId, bidder: &AgentId) -> Result<Bid> {
        let mut bids = self.bids.write().await;
        let task_bids = bids
            .get_mut(task_id)
            .ok_or_else(|| OpenTaskError::BidNotFound {
                task_id: task_id.to_prefixed_string(),
                bidder: bidder.to_prefixed_string(),
            })?;

        let bid = task_bids
            .iter_mut()
            .find(|b| &b.bidder == bidder && b.is_eligible())
            .ok_or_else(|| OpenTaskError::BidNotFound {
                task_id: task_id.to_prefixed_string(),
                bidder: bidder.to_prefixed_string(),
            })?;

        bid.withdrawn = true;
        debug!(task_id = %task_id, bidder = %bidder, "bid withdrawn");
        Ok(bid.clone())
    }

    /// All bids on a task, in submission order, withdrawn included
    pub async fn bids(&self, task_id: &TaskId) -> Vec<Bid> {
        self.bids
            .read()
            .await
            .get(task_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Bids still in the running for selection, in submission order
    pub async fn eligible(&self, task_id: &TaskId) -> Vec<Bid> {
        self.bids
            .read()
            .await
            .get(task_id)
            .map(|task_bids| {
                task_bids
                    .iter()
                    .filter(|b| b.is_eligible())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for BidLedger {
    fn default() -> Self {
        Self::new()
    }
}

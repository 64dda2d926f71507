//! OpenTask Disputes - Judge-panel coordination for rejected deliverables
//!
//! The coordinator owns dispute records and the judge panel. Evaluation
//! fans the dispute context out to every judge concurrently, collects
//! votes until quorum or the judge timeout, and records the rounded mean
//! exactly once. Evaluating an already-resolved dispute replays the
//! recorded percentage.
//!
//! # Invariants
//!
//! 1. One dispute per task
//! 2. The resolved percentage is recorded at most once and never changes
//! 3. A failed judge contributes no vote and blocks nothing
//! 4. Zero votes resolve nothing; the dispute stays open for another pass

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use opentask_types::{
    AgentId, Dispute, DisputeContext, DisputeId, DisputeStatus, JudgeVote, OpenTaskError, Result,
    TaskId,
};
use opentask_judges::Judge;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Configuration for the dispute coordinator
#[derive(Debug, Clone)]
pub struct DisputeConfig {
    /// Votes required before collection stops; `None` means the full panel
    pub quorum: Option<usize>,
    /// How long to wait for votes before settling for what arrived
    pub judge_timeout: Duration,
}

impl Default for DisputeConfig {
    fn default() -> Self {
        Self {
            quorum: None,
            judge_timeout: Duration::from_secs(30),
        }
    }
}

/// The dispute coordinator
///
/// Thread-safe and cheap to clone. Judges are shared trait objects; the
/// panel is fixed at construction.
#[derive(Clone)]
pub struct DisputeCoordinator {
    judges: Vec<Arc<dyn Judge>>,
    config: DisputeConfig,
    /// Dispute records by id
    disputes: Arc<RwLock<HashMap<DisputeId, Dispute>>>,
    /// Dispute lookup by task (one dispute per task)
    task_disputes: Arc<RwLock<HashMap<TaskId, DisputeId>>>,
}

impl DisputeCoordinator {
    /// Create a coordinator over a judge panel
    pub fn new(judges: Vec<Arc<dyn Judge>>, config: DisputeConfig) -> Self {
        Self {
            judges,
            config,
            disputes: Arc::new(RwLock::new(HashMap::new())),
            task_disputes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of judges on the panel
    pub fn panel_size(&self) -> usize {
        self.judges.len()
    }

    /// Votes required before collection stops
    fn required_quorum(&self) -> usize {
        let panel = self.judges.len();
        self.config
            .quorum
            .unwrap_or(panel)
            .max(1)
            .min(panel.max(1))
    }

    /// Open a dispute over a task
    ///
    /// One dispute per task. A replay with the same claimant and claim
    /// returns the existing dispute; any other re-filing is a conflict.
    pub async fn open(
        &self,
        task_id: &TaskId,
        claimant: &AgentId,
        context: DisputeContext,
    ) -> Result<Dispute> {
        if context.claim.trim().is_empty() {
            return Err(OpenTaskError::validation("claim", "claim must not be empty"));
        }

        let mut disputes = self.disputes.write().await;
        let mut task_disputes = self.task_disputes.write().await;

        if let Some(existing_id) = task_disputes.get(task_id) {
            let existing =
                disputes
                    .get(existing_id)
                    .ok_or_else(|| OpenTaskError::DisputeNotFound {
                        dispute_id: existing_id.to_string(),
                    })?;
            if existing.claimant == *claimant && existing.context.claim == context.claim {
                return Ok(existing.clone());
            }
            return Err(OpenTaskError::state_conflict(
                task_id.to_string(),
                "disputed",
                "open dispute",
            ));
        }

        let dispute = Dispute {
            id: DisputeId::new(),
            task_id: task_id.clone(),
            claimant: claimant.clone(),
            context,
            votes: Vec::new(),
            resolved_pct: None,
            status: DisputeStatus::Open,
            opened_at: Utc::now(),
            resolved_at: None,
        };

        task_disputes.insert(task_id.clone(), dispute.id.clone());
        disputes.insert(dispute.id.clone(), dispute.clone());

        info!(dispute_id = %dispute.id, task_id = %task_id, "dispute opened");
        Ok(dispute)
    }

    /// Submit the worker's rebuttal
    ///
    /// Accepted once, any time before resolution; judges see it because
    /// evaluation reads the stored context.
    pub async fn submit_rebuttal(
        &self,
        dispute_id: &DisputeId,
        rebuttal: impl Into<String>,
    ) -> Result<Dispute> {
        let mut disputes = self.disputes.write().await;
        let dispute =
            disputes
                .get_mut(dispute_id)
                .ok_or_else(|| OpenTaskError::DisputeNotFound {
                    dispute_id: dispute_id.to_string(),
                })?;

        if dispute.is_resolved() {
            return Err(OpenTaskError::state_conflict(
                dispute_id.to_string(),
                "resolved",
                "submit rebuttal",
            ));
        }
        if dispute.context.rebuttal.is_some() {
            return Err(OpenTaskError::state_conflict(
                dispute_id.to_string(),
                "rebutted",
                "submit rebuttal",
            ));
        }

        dispute.context.rebuttal = Some(rebuttal.into());
        Ok(dispute.clone())
    }

    /// Evaluate a dispute and record the worker percentage
    ///
    /// Dispatches the context to the whole panel at once. Collection stops
    /// at quorum (stragglers are abandoned) or at the judge timeout with
    /// whatever votes arrived. The result is the mean vote, rounded half
    /// up, recorded exactly once; re-evaluation returns the recorded value.
    pub async fn evaluate(&self, dispute_id: &DisputeId) -> Result<u8> {
        let context = {
            let disputes = self.disputes.read().await;
            let dispute =
                disputes
                    .get(dispute_id)
                    .ok_or_else(|| OpenTaskError::DisputeNotFound {
                        dispute_id: dispute_id.to_string(),
                    })?;
            if let Some(pct) = dispute.resolved_pct {
                return Ok(pct);
            }
            dispute.context.clone()
        };

        let quorum = self.required_quorum();
        let votes = self.collect_votes(&context, quorum).await;

        if votes.is_empty() {
            warn!(dispute_id = %dispute_id, "no judge votes arrived");
            return Err(OpenTaskError::QuorumNotReached { votes: 0, quorum });
        }

        let pct = mean_pct(&votes);

        let mut disputes = self.disputes.write().await;
        let dispute =
            disputes
                .get_mut(dispute_id)
                .ok_or_else(|| OpenTaskError::DisputeNotFound {
                    dispute_id: dispute_id.to_string(),
                })?;
        // Another evaluation may have won the race; its record stands.
        if let Some(recorded) = dispute.resolved_pct {
            return Ok(recorded);
        }

        dispute.votes = votes;
        dispute.resolved_pct = Some(pct);
        dispute.status = DisputeStatus::Resolved;
        dispute.resolved_at = Some(Utc::now());

        info!(
            dispute_id = %dispute_id,
            worker_pct = pct,
            votes = dispute.votes.len(),
            "dispute resolved"
        );
        Ok(pct)
    }

    /// Fan the context out and gather votes until quorum or timeout
    async fn collect_votes(&self, context: &DisputeContext, quorum: usize) -> Vec<JudgeVote> {
        let mut pending: FuturesUnordered<_> = self
            .judges
            .iter()
            .map(|judge| {
                let judge = judge.clone();
                let context = context.clone();
                async move {
                    let outcome = judge.evaluate(&context).await;
                    (judge.id().clone(), outcome)
                }
            })
            .collect();

        let deadline = tokio::time::sleep(self.config.judge_timeout);
        tokio::pin!(deadline);

        let mut votes = Vec::new();
        loop {
            if votes.len() >= quorum {
                break;
            }
            tokio::select! {
                next = pending.next() => {
                    match next {
                        Some((judge_id, Ok(verdict))) => {
                            votes.push(JudgeVote {
                                judge: judge_id,
                                worker_pct: verdict.worker_pct,
                                reasoning: verdict.reasoning,
                                voted_at: Utc::now(),
                            });
                        }
                        Some((judge_id, Err(error))) => {
                            warn!(judge = %judge_id, %error, "judge evaluation failed");
                        }
                        None => break,
                    }
                }
                _ = &mut deadline => break,
            }
        }
        // Dropping the stream abandons any judge still thinking.
        votes
    }

    /// Get a dispute by id
    pub async fn get(&self, dispute_id: &DisputeId) -> Result<Dispute> {
        let disputes = self.disputes.read().await;
        disputes
            .get(dispute_id)
            .cloned()
            .ok_or_else(|| OpenTaskError::DisputeNotFound {
                dispute_id: dispute_id.to_string(),
            })
    }

    /// Get the dispute over a task, if one was filed
    pub async fn dispute_for_task(&self, task_id: &TaskId) -> Option<Dispute> {
        // Taken one at a time; holding both here would invert open()'s
        // lock order.
        let dispute_id = {
            let task_disputes = self.task_disputes.read().await;
            task_disputes.get(task_id).cloned()
        }?;
        let disputes = self.disputes.read().await;
        disputes.get(&dispute_id).cloned()
    }
}

/// Mean of the votes, rounded half up
fn mean_pct(votes: &[JudgeVote]) -> u8 {
    let sum: u32 = votes.iter().map(|v| v.worker_pct as u32).sum();
    let n = votes.len() as u32;
    ((sum + n / 2) / n) as u8
}

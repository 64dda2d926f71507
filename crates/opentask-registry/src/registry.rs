//! Task lifecycle state machine
//!
//! The registry is the only writer of task records. Transition guards run
//! against a cloned snapshot with no lock held; slow judge evaluation runs
//! outside the store entirely; the version re-check plus any keyed ledger
//! settlement happen inside one write-lock critical section, so a racing
//! transition cannot slip between the check and the payout. A transition
//! that loses the version race reports `ConcurrentModification`; retrying
//! is safe because every operation replays idempotently.
//!
//! Bid placement and withdrawal run under the task guard, and winner
//! selection reads the bid ledger inside the commit critical section
//! (lock order: tasks, then bids). A bid can land only while the task is
//! observably open, and selection never resurrects a withdrawn bid.

use opentask_disputes::DisputeCoordinator;
use opentask_ledger::Ledger;
use opentask_market::{BidLedger, FirstSubmitted, SelectionPolicy};
use opentask_types::{
    AgentId, Amount, Bid, Deliverable, Dispute, DisputeContext, DisputeId, HoldId,
    IdempotencyKey, OpenTaskError, Result, SettlementFeedback, SettlementOutcome, Task, TaskId,
    TaskState, Transition, TransitionActor,
};

use crate::config::RegistryConfig;
use crate::reputation::{NullReputationSink, ReputationSink};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// The task lifecycle engine
///
/// Cheap to clone; all clones share the same stores.
#[derive(Clone)]
pub struct TaskRegistry {
    /// Escrow engine
    ledger: Ledger,
    /// Bid collection
    bids: BidLedger,
    /// Dispute coordination
    disputes: DisputeCoordinator,
    /// Winner selection policy
    policy: Arc<dyn SelectionPolicy>,
    /// Settlement outcome sink
    reputation: Arc<dyn ReputationSink>,
    /// Lifecycle windows
    config: RegistryConfig,
    /// Task records by id
    tasks: Arc<RwLock<HashMap<TaskId, Task>>>,
}

impl TaskRegistry {
    /// Create a registry with first-submitted selection and no reputation sink
    pub fn new(
        ledger: Ledger,
        bids: BidLedger,
        disputes: DisputeCoordinator,
        config: RegistryConfig,
    ) -> Self {
        Self {
            ledger,
            bids,
            disputes,
            policy: Arc::new(FirstSubmitted),
            reputation: Arc::new(NullReputationSink),
            config,
            tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Replace the winner selection policy
    pub fn with_policy(mut self, policy: Arc<dyn SelectionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the reputation sink
    pub fn with_reputation(mut self, reputation: Arc<dyn ReputationSink>) -> Self {
        self.reputation = reputation;
        self
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Create a task: escrow the reward and open bidding
    ///
    /// The reward is held against the poster's account before the task
    /// exists; a failed hold aborts creation and nothing is persisted.
    pub async fn create_task(
        &self,
        poster: &AgentId,
        title: impl Into<String>,
        description: impl Into<String>,
        reward: Amount,
    ) -> Result<Task> {
        let title = title.into();
        let description = description.into();
        if title.trim().is_empty() {
            return Err(OpenTaskError::validation("title", "title must not be empty"));
        }
        if description.trim().is_empty() {
            return Err(OpenTaskError::validation(
                "description",
                "description must not be empty",
            ));
        }

        let task_id = TaskId::new();
        let now = Utc::now();
        let key = IdempotencyKey::for_task(&task_id, "fund");
        let hold = self.ledger.hold(poster, &task_id, reward, &key).await?;

        let mut task = Task {
            id: task_id.clone(),
            poster: poster.clone(),
            title,
            description,
            reward,
            state: TaskState::Created,
            bidding_deadline: None,
            execution_deadline: None,
            review_deadline: None,
            worker: None,
            hold_id: Some(hold.id.clone()),
            deliverable: None,
            rejection_claim: None,
            dispute_id: None,
            created_at: now,
            updated_at: now,
            version: 0,
            transitions: Vec::new(),
        };
        task.record_transition(
            TaskState::Funded,
            TransitionActor::Agent { id: poster.clone() },
            now,
        );
        task.record_transition(TaskState::BiddingOpen, TransitionActor::System, now);
        task.bidding_deadline = Some(now + self.config.bidding_window);

        self.tasks
            .write()
            .await
            .insert(task_id.clone(), task.clone());
        info!(task_id = %task_id, poster = %poster, reward = %reward, "task funded and open for bids");
        Ok(task)
    }

    // ========================================================================
    // Bidding
    // ========================================================================

    /// Submit a bid on an open task
    ///
    /// The task guard is held across the placement, so no transition can
    /// close bidding between the state check and the bid landing.
    pub async fn submit_bid(&self, task_id: &TaskId, bidder: &AgentId) -> Result<Bid> {
        let tasks = self.tasks.read().await;
        let task = tasks
            .get(task_id)
            .ok_or_else(|| OpenTaskError::TaskNotFound {
                task_id: task_id.to_prefixed_string(),
            })?;

        if task.state != TaskState::BiddingOpen {
            return Err(Self::conflict(task, "bid on"));
        }
        let now = Utc::now();
        let deadline = Self::bidding_deadline(task)?;
        if now >= deadline {
            return Err(OpenTaskError::state_conflict(
                task.id.to_prefixed_string(),
                "past the bidding deadline",
                "bid on",
            ));
        }

        self.bids.place(task_id, bidder.clone(), now).await
    }

    /// Withdraw a pending bid
    ///
    /// Also under the task guard: a withdrawal that returns `Ok` happened
    /// before any selection, which runs under the write lock and will see
    /// it.
    pub async fn withdraw_bid(&self, task_id: &TaskId, bidder: &AgentId) -> Result<Bid> {
        let tasks = self.tasks.read().await;
        let task = tasks
            .get(task_id)
            .ok_or_else(|| OpenTaskError::TaskNotFound {
                task_id: task_id.to_prefixed_string(),
            })?;
        if task.state != TaskState::BiddingOpen {
            return Err(Self::conflict(task, "withdraw a bid on"));
        }
        self.bids.withdraw(task_id, bidder).await
    }

    /// Close bidding early and assign the winner
    ///
    /// A poster action; the at-deadline close is the sweep's job through
    /// `expire_bidding`. Closing with zero eligible bids is refused rather
    /// than expiring the task ahead of its deadline.
    pub async fn close_bidding(&self, task_id: &TaskId, closer: &AgentId) -> Result<Task> {
        let task = self.snapshot(task_id).await?;

        if task.worker.is_some() {
            return Ok(task);
        }
        if task.state != TaskState::BiddingOpen {
            return Err(Self::conflict(&task, "close bidding for"));
        }
        if closer != &task.poster {
            return Err(OpenTaskError::NotAuthorized {
                agent: closer.to_prefixed_string(),
                operation: "close bidding".to_string(),
                reason: "only the poster may close bidding early".to_string(),
            });
        }

        let now = Utc::now();
        let mut tasks = self.tasks.write().await;
        let current = Self::locked(&mut tasks, task_id, task.version)?;
        // Selection reads the bid ledger inside the critical section, so
        // a withdrawal acknowledged before this commit is never assigned.
        let eligible = self.bids.eligible(task_id).await;
        let winner = self.policy.select(&eligible).ok_or_else(|| {
            OpenTaskError::validation("bids", "no eligible bids to select a winner from")
        })?;
        self.apply_assignment(
            current,
            winner.clone(),
            TransitionActor::Agent { id: closer.clone() },
            now,
        );
        let task = current.clone();
        drop(tasks);

        info!(task_id = %task.id, worker = %winner, "winner selected; task in execution");
        Ok(task)
    }

    /// Sweep entry: settle a bidding window whose deadline has passed
    ///
    /// Assigns the winner when eligible bids exist; otherwise the task
    /// expires unfilled and the hold is released to the poster. Both
    /// outcomes are decided and committed in one critical section, since
    /// the bid set must not change between the look and the commit.
    pub async fn expire_bidding(&self, task_id: &TaskId, now: DateTime<Utc>) -> Result<Task> {
        let task = self.snapshot(task_id).await?;

        if task.state == TaskState::ExpiredUnfilled || task.worker.is_some() {
            return Ok(task);
        }
        if task.state != TaskState::BiddingOpen {
            return Err(Self::conflict(&task, "expire bidding for"));
        }
        let deadline = Self::bidding_deadline(&task)?;
        if now < deadline {
            return Err(Self::too_early(&task, "expire bidding for", deadline));
        }

        let mut tasks = self.tasks.write().await;
        let current = Self::locked(&mut tasks, task_id, task.version)?;
        let eligible = self.bids.eligible(task_id).await;
        if let Some(winner) = self.policy.select(&eligible) {
            self.apply_assignment(current, winner.clone(), TransitionActor::Scheduler, now);
            let task = current.clone();
            drop(tasks);

            info!(task_id = %task.id, worker = %winner, "winner selected; task in execution");
            return Ok(task);
        }

        let key = IdempotencyKey::for_task(task_id, "expire");
        let hold_id = Self::hold_id(&task)?;
        self.ledger.release(&hold_id, &key).await?;
        current.record_transition(TaskState::ExpiredUnfilled, TransitionActor::Scheduler, now);
        let task = current.clone();
        drop(tasks);

        info!(task_id = %task.id, "bidding expired with no eligible bids");
        self.publish_feedback(feedback_for(
            &task,
            SettlementOutcome::ExpiredUnfilled,
            Amount::zero(),
        ))
        .await;
        Ok(task)
    }

    // ========================================================================
    // Execution and review
    // ========================================================================

    /// Submit the work product for review
    pub async fn submit_deliverable(
        &self,
        task_id: &TaskId,
        worker: &AgentId,
        content: impl Into<String>,
    ) -> Result<Task> {
        let content = content.into();
        let task = self.snapshot(task_id).await?;

        // A replay of the applied submission is a no-op.
        if task.state == TaskState::DeliveredPendingReview {
            if let Some(existing) = &task.deliverable {
                if &existing.submitted_by == worker && existing.content == content {
                    return Ok(task);
                }
            }
        }
        if task.state != TaskState::InExecution {
            return Err(Self::conflict(&task, "submit a deliverable for"));
        }
        if Some(worker) != task.worker.as_ref() {
            return Err(OpenTaskError::NotAuthorized {
                agent: worker.to_prefixed_string(),
                operation: "submit a deliverable".to_string(),
                reason: "only the assigned worker may deliver".to_string(),
            });
        }
        if content.trim().is_empty() {
            return Err(OpenTaskError::validation(
                "content",
                "deliverable must not be empty",
            ));
        }
        let now = Utc::now();
        let deadline = Self::execution_deadline(&task)?;
        if now > deadline {
            return Err(OpenTaskError::state_conflict(
                task.id.to_prefixed_string(),
                "past the execution deadline",
                "submit a deliverable for",
            ));
        }

        let mut tasks = self.tasks.write().await;
        let current = Self::locked(&mut tasks, task_id, task.version)?;
        current.deliverable = Some(Deliverable {
            submitted_by: worker.clone(),
            content,
            submitted_at: now,
        });
        current.record_transition(
            TaskState::DeliveredPendingReview,
            TransitionActor::Agent { id: worker.clone() },
            now,
        );
        current.review_deadline = Some(now + self.config.review_window);
        let task = current.clone();
        drop(tasks);

        info!(task_id = %task.id, worker = %worker, "deliverable submitted for review");
        Ok(task)
    }

    /// Approve the deliverable and pay the worker in full
    pub async fn approve(&self, task_id: &TaskId, approver: &AgentId) -> Result<Task> {
        let task = self.snapshot(task_id).await?;

        if task.state == TaskState::Settled {
            return Ok(task);
        }
        if task.state != TaskState::DeliveredPendingReview {
            return Err(Self::conflict(&task, "approve"));
        }
        if approver != &task.poster {
            return Err(OpenTaskError::NotAuthorized {
                agent: approver.to_prefixed_string(),
                operation: "approve".to_string(),
                reason: "only the poster may approve".to_string(),
            });
        }

        self.capture_and_settle(
            task,
            TransitionActor::Agent {
                id: approver.clone(),
            },
            SettlementOutcome::Approved,
            Utc::now(),
        )
        .await
    }

    /// Sweep entry: approve a deliverable whose review window has lapsed
    pub async fn approve_by_timeout(&self, task_id: &TaskId, now: DateTime<Utc>) -> Result<Task> {
        let task = self.snapshot(task_id).await?;

        if task.state == TaskState::Settled {
            return Ok(task);
        }
        if task.state != TaskState::DeliveredPendingReview {
            return Err(Self::conflict(&task, "auto-approve"));
        }
        let deadline = Self::review_deadline(&task)?;
        if now <= deadline {
            return Err(Self::too_early(&task, "auto-approve", deadline));
        }

        self.capture_and_settle(
            task,
            TransitionActor::Scheduler,
            SettlementOutcome::AutoApproved,
            now,
        )
        .await
    }

    /// Reject the deliverable with a claim
    pub async fn reject(
        &self,
        task_id: &TaskId,
        rejecter: &AgentId,
        claim: impl Into<String>,
    ) -> Result<Task> {
        let claim = claim.into();
        let task = self.snapshot(task_id).await?;

        if task.state == TaskState::DeliveredRejected {
            return Ok(task);
        }
        if task.state != TaskState::DeliveredPendingReview {
            return Err(Self::conflict(&task, "reject"));
        }
        if rejecter != &task.poster {
            return Err(OpenTaskError::NotAuthorized {
                agent: rejecter.to_prefixed_string(),
                operation: "reject".to_string(),
                reason: "only the poster may reject".to_string(),
            });
        }
        if claim.trim().is_empty() {
            return Err(OpenTaskError::validation("claim", "claim must not be empty"));
        }
        let now = Utc::now();
        let deadline = Self::review_deadline(&task)?;
        if now > deadline {
            return Err(OpenTaskError::state_conflict(
                task.id.to_prefixed_string(),
                "past the review deadline",
                "reject",
            ));
        }

        let mut tasks = self.tasks.write().await;
        let current = Self::locked(&mut tasks, task_id, task.version)?;
        current.rejection_claim = Some(claim);
        current.record_transition(
            TaskState::DeliveredRejected,
            TransitionActor::Agent {
                id: rejecter.clone(),
            },
            now,
        );
        let task = current.clone();
        drop(tasks);

        info!(task_id = %task.id, "deliverable rejected");
        Ok(task)
    }

    /// Cancel before assignment; the hold returns to the poster
    pub async fn cancel(&self, task_id: &TaskId, canceller: &AgentId) -> Result<Task> {
        let task = self.snapshot(task_id).await?;

        if task.state == TaskState::Cancelled {
            return Ok(task);
        }
        if !matches!(task.state, TaskState::Funded | TaskState::BiddingOpen) {
            return Err(Self::conflict(&task, "cancel"));
        }
        if canceller != &task.poster {
            return Err(OpenTaskError::NotAuthorized {
                agent: canceller.to_prefixed_string(),
                operation: "cancel".to_string(),
                reason: "only the poster may cancel".to_string(),
            });
        }

        let key = IdempotencyKey::for_task(task_id, "cancel");
        let hold_id = Self::hold_id(&task)?;
        let now = Utc::now();

        let mut tasks = self.tasks.write().await;
        let current = Self::locked(&mut tasks, task_id, task.version)?;
        self.ledger.release(&hold_id, &key).await?;
        current.record_transition(
            TaskState::Cancelled,
            TransitionActor::Agent {
                id: canceller.clone(),
            },
            now,
        );
        let task = current.clone();
        drop(tasks);

        info!(task_id = %task.id, "task cancelled; hold released");
        self.publish_feedback(feedback_for(
            &task,
            SettlementOutcome::Cancelled,
            Amount::zero(),
        ))
        .await;
        Ok(task)
    }

    /// Sweep entry: default a worker who missed the execution deadline
    pub async fn default_execution(&self, task_id: &TaskId, now: DateTime<Utc>) -> Result<Task> {
        let task = self.snapshot(task_id).await?;

        if task.state == TaskState::Defaulted {
            return Ok(task);
        }
        if task.state != TaskState::InExecution {
            return Err(Self::conflict(&task, "default"));
        }
        let deadline = Self::execution_deadline(&task)?;
        if now <= deadline {
            return Err(Self::too_early(&task, "default", deadline));
        }

        let key = IdempotencyKey::for_task(task_id, "default");
        let hold_id = Self::hold_id(&task)?;

        let mut tasks = self.tasks.write().await;
        let current = Self::locked(&mut tasks, task_id, task.version)?;
        self.ledger.release(&hold_id, &key).await?;
        current.record_transition(TaskState::Defaulted, TransitionActor::Scheduler, now);
        let task = current.clone();
        drop(tasks);

        info!(task_id = %task.id, "execution deadline missed; task defaulted");
        self.publish_feedback(feedback_for(
            &task,
            SettlementOutcome::Defaulted,
            Amount::zero(),
        ))
        .await;
        Ok(task)
    }

    // ========================================================================
    // Disputes
    // ========================================================================

    /// File a dispute over a rejected deliverable
    ///
    /// Either party may file. The dispute's claim is the poster's stored
    /// rejection claim, so filings from both parties converge on the same
    /// dispute record.
    pub async fn file_dispute(&self, task_id: &TaskId, filer: &AgentId) -> Result<Task> {
        let task = self.snapshot(task_id).await?;

        if task.state == TaskState::Disputed {
            return Ok(task);
        }
        if task.state != TaskState::DeliveredRejected {
            return Err(Self::conflict(&task, "dispute"));
        }
        let worker = task
            .worker
            .clone()
            .ok_or_else(|| OpenTaskError::internal("rejected task carries no worker"))?;
        if filer != &task.poster && filer != &worker {
            return Err(OpenTaskError::NotAuthorized {
                agent: filer.to_prefixed_string(),
                operation: "file a dispute".to_string(),
                reason: "only the poster or the worker may dispute".to_string(),
            });
        }
        let claim = task
            .rejection_claim
            .clone()
            .ok_or_else(|| OpenTaskError::internal("rejected task carries no claim"))?;

        let context = DisputeContext {
            task_id: task.id.clone(),
            task_title: task.title.clone(),
            task_description: task.description.clone(),
            reward: task.reward,
            deliverable: task.deliverable.as_ref().map(|d| d.content.clone()),
            claim,
            rebuttal: None,
        };
        let dispute = self.disputes.open(task_id, &task.poster, context).await?;

        let now = Utc::now();
        let mut tasks = self.tasks.write().await;
        let current = Self::locked(&mut tasks, task_id, task.version)?;
        current.dispute_id = Some(dispute.id.clone());
        current.record_transition(
            TaskState::Disputed,
            TransitionActor::Agent { id: filer.clone() },
            now,
        );
        let task = current.clone();
        drop(tasks);

        info!(task_id = %task.id, dispute_id = %dispute.id, "dispute filed");
        Ok(task)
    }

    /// Submit the worker's rebuttal to the dispute claim
    pub async fn submit_rebuttal(
        &self,
        task_id: &TaskId,
        worker: &AgentId,
        rebuttal: impl Into<String>,
    ) -> Result<Dispute> {
        let task = self.snapshot(task_id).await?;

        if task.state != TaskState::Disputed {
            return Err(Self::conflict(&task, "rebut"));
        }
        if Some(worker) != task.worker.as_ref() {
            return Err(OpenTaskError::NotAuthorized {
                agent: worker.to_prefixed_string(),
                operation: "submit a rebuttal".to_string(),
                reason: "only the worker may rebut the claim".to_string(),
            });
        }
        let dispute_id = Self::dispute_id(&task)?;

        self.disputes.submit_rebuttal(&dispute_id, rebuttal).await
    }

    /// Resolve the dispute: collect the judges' percentage and split the hold
    ///
    /// Evaluation runs outside the store lock; only the keyed split and the
    /// `Settled` commit sit in the critical section. A failed evaluation or
    /// split leaves the task `Disputed`, and the next attempt replays the
    /// recorded percentage and the keyed split idempotently.
    pub async fn resolve_dispute(&self, task_id: &TaskId) -> Result<Task> {
        let task = self.snapshot(task_id).await?;

        if task.state == TaskState::Settled {
            return Ok(task);
        }
        if task.state != TaskState::Disputed {
            return Err(Self::conflict(&task, "resolve"));
        }
        let worker = task
            .worker
            .clone()
            .ok_or_else(|| OpenTaskError::internal("disputed task carries no worker"))?;
        let dispute_id = Self::dispute_id(&task)?;
        let hold_id = Self::hold_id(&task)?;

        let worker_pct = self.disputes.evaluate(&dispute_id).await?;

        let key = IdempotencyKey::for_task(task_id, "resolve");
        let now = Utc::now();
        let mut tasks = self.tasks.write().await;
        let current = Self::locked(&mut tasks, task_id, task.version)?;
        let settlement = self
            .ledger
            .split(&hold_id, &worker, worker_pct, &key)
            .await?;
        current.record_transition(TaskState::Settled, TransitionActor::System, now);
        let task = current.clone();
        drop(tasks);

        let paid = settlement.paid_to(&worker);
        info!(task_id = %task.id, worker_pct, paid = %paid, "dispute resolved; hold split");
        self.publish_feedback(feedback_for(
            &task,
            SettlementOutcome::DisputeSplit { worker_pct },
            paid,
        ))
        .await;
        Ok(task)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Get a task by id
    pub async fn get_task(&self, task_id: &TaskId) -> Result<Task> {
        self.snapshot(task_id).await
    }

    /// Get the dispute over a task
    pub async fn get_dispute(&self, task_id: &TaskId) -> Result<Dispute> {
        let task = self.snapshot(task_id).await?;
        let dispute_id = task
            .dispute_id
            .ok_or_else(|| OpenTaskError::DisputeNotFound {
                dispute_id: format!("for {}", task_id),
            })?;
        self.disputes.get(&dispute_id).await
    }

    /// A task's committed transition log
    pub async fn history(&self, task_id: &TaskId) -> Result<Vec<Transition>> {
        Ok(self.snapshot(task_id).await?.transitions)
    }

    /// All tasks not yet in a terminal state, for the deadline sweep
    pub async fn non_terminal_tasks(&self) -> Vec<Task> {
        let tasks = self.tasks.read().await;
        tasks
            .values()
            .filter(|t| !t.is_terminal())
            .cloned()
            .collect()
    }

    /// Number of tasks the registry holds
    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Clone the current record of a task
    async fn snapshot(&self, task_id: &TaskId) -> Result<Task> {
        let tasks = self.tasks.read().await;
        tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| OpenTaskError::TaskNotFound {
                task_id: task_id.to_prefixed_string(),
            })
    }

    /// Version-checked mutable access inside the commit critical section
    ///
    /// Version equality implies the state is unchanged since the snapshot,
    /// since every committed transition bumps the version.
    fn locked<'a>(
        tasks: &'a mut HashMap<TaskId, Task>,
        task_id: &TaskId,
        expected_version: u64,
    ) -> Result<&'a mut Task> {
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| OpenTaskError::TaskNotFound {
                task_id: task_id.to_prefixed_string(),
            })?;
        if task.version != expected_version {
            return Err(OpenTaskError::ConcurrentModification {
                entity: task_id.to_prefixed_string(),
                expected: expected_version,
                found: task.version,
            });
        }
        Ok(task)
    }

    /// Assignment hops on a locked record: `Assigned`, then `InExecution`
    fn apply_assignment(
        &self,
        current: &mut Task,
        winner: AgentId,
        actor: TransitionActor,
        now: DateTime<Utc>,
    ) {
        current.worker = Some(winner);
        current.record_transition(TaskState::Assigned, actor, now);
        current.record_transition(TaskState::InExecution, TransitionActor::System, now);
        current.execution_deadline = Some(now + self.config.execution_window);
    }

    /// Commit `Settled` by capturing the full hold for the worker
    ///
    /// Both approval paths derive the same key, so whichever runs second
    /// replays the first one's settlement.
    async fn capture_and_settle(
        &self,
        snapshot: Task,
        actor: TransitionActor,
        outcome: SettlementOutcome,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        let worker = snapshot
            .worker
            .clone()
            .ok_or_else(|| OpenTaskError::internal("delivered task carries no worker"))?;
        let hold_id = Self::hold_id(&snapshot)?;
        let key = IdempotencyKey::for_task(&snapshot.id, "approve");

        let mut tasks = self.tasks.write().await;
        let current = Self::locked(&mut tasks, &snapshot.id, snapshot.version)?;
        let settlement = self.ledger.capture(&hold_id, &worker, &key).await?;
        current.record_transition(TaskState::Settled, actor, now);
        let task = current.clone();
        drop(tasks);

        let paid = settlement.paid_to(&worker);
        info!(task_id = %task.id, worker = %worker, paid = %paid, "deliverable approved; hold captured");
        self.publish_feedback(feedback_for(&task, outcome, paid)).await;
        Ok(task)
    }

    async fn publish_feedback(&self, feedback: SettlementFeedback) {
        if let Err(err) = self.reputation.publish(feedback).await {
            warn!(error = %err, "settlement feedback publication failed");
        }
    }

    fn conflict(task: &Task, operation: &str) -> OpenTaskError {
        OpenTaskError::state_conflict(task.id.to_prefixed_string(), task.state.as_str(), operation)
    }

    fn too_early(task: &Task, operation: &str, deadline: DateTime<Utc>) -> OpenTaskError {
        OpenTaskError::DeadlineNotReached {
            entity: task.id.to_prefixed_string(),
            operation: operation.to_string(),
            deadline: deadline.to_rfc3339(),
        }
    }

    fn hold_id(task: &Task) -> Result<HoldId> {
        task.hold_id
            .clone()
            .ok_or_else(|| OpenTaskError::internal("funded task carries no escrow hold"))
    }

    fn dispute_id(task: &Task) -> Result<DisputeId> {
        task.dispute_id
            .clone()
            .ok_or_else(|| OpenTaskError::internal("disputed task carries no dispute id"))
    }

    fn bidding_deadline(task: &Task) -> Result<DateTime<Utc>> {
        task.bidding_deadline
            .ok_or_else(|| OpenTaskError::internal("bidding task carries no bidding deadline"))
    }

    fn execution_deadline(task: &Task) -> Result<DateTime<Utc>> {
        task.execution_deadline
            .ok_or_else(|| OpenTaskError::internal("executing task carries no execution deadline"))
    }

    fn review_deadline(task: &Task) -> Result<DateTime<Utc>> {
        task.review_deadline
            .ok_or_else(|| OpenTaskError::internal("delivered task carries no review deadline"))
    }
}

/// Build the feedback record for a terminal settlement
fn feedback_for(task: &Task, outcome: SettlementOutcome, paid_to_worker: Amount) -> SettlementFeedback {
    SettlementFeedback {
        task_id: task.id.clone(),
        poster: task.poster.clone(),
        worker: task.worker.clone(),
        outcome,
        paid_to_worker,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentask_disputes::DisputeConfig;

    fn registry_with(config: RegistryConfig) -> (TaskRegistry, Ledger) {
        let ledger = Ledger::new();
        let registry = TaskRegistry::new(
            ledger.clone(),
            BidLedger::new(),
            DisputeCoordinator::new(Vec::new(), DisputeConfig::default()),
            config,
        );
        (registry, ledger)
    }

    async fn funded_poster(ledger: &Ledger, amount: u64) -> AgentId {
        let poster = AgentId::new();
        ledger.deposit(&poster, Amount::new(amount)).await.unwrap();
        poster
    }

    #[tokio::test]
    async fn test_create_opens_bidding_and_locks_reward() {
        let (registry, ledger) = registry_with(RegistryConfig::default());
        let poster = funded_poster(&ledger, 500).await;

        let task = registry
            .create_task(&poster, "Title", "Do the thing", Amount::new(120))
            .await
            .unwrap();

        assert_eq!(task.state, TaskState::BiddingOpen);
        assert!(task.bidding_deadline.is_some());
        assert_eq!(task.transitions.len(), 2);
        assert_eq!(task.transitions[0].from, TaskState::Created);
        assert_eq!(task.transitions[1].to, TaskState::BiddingOpen);

        let balance = ledger.balance(&poster).await;
        assert_eq!(balance.available, Amount::new(380));
        assert_eq!(balance.locked, Amount::new(120));
    }

    #[tokio::test]
    async fn test_create_without_funds_persists_nothing() {
        let (registry, ledger) = registry_with(RegistryConfig::default());
        let poster = funded_poster(&ledger, 50).await;

        let err = registry
            .create_task(&poster, "Title", "Work", Amount::new(100))
            .await
            .unwrap_err();

        assert!(matches!(err, OpenTaskError::InsufficientFunds { .. }));
        assert_eq!(registry.task_count().await, 0);
        assert_eq!(ledger.balance(&poster).await.available, Amount::new(50));
    }

    #[tokio::test]
    async fn test_create_rejects_blank_title() {
        let (registry, ledger) = registry_with(RegistryConfig::default());
        let poster = funded_poster(&ledger, 100).await;

        let err = registry
            .create_task(&poster, "  ", "Work", Amount::new(10))
            .await
            .unwrap_err();
        assert!(matches!(err, OpenTaskError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_bid_after_deadline_is_rejected() {
        let config = RegistryConfig {
            bidding_window: chrono::Duration::zero(),
            ..RegistryConfig::default()
        };
        let (registry, ledger) = registry_with(config);
        let poster = funded_poster(&ledger, 100).await;
        let task = registry
            .create_task(&poster, "Title", "Work", Amount::new(10))
            .await
            .unwrap();

        let err = registry
            .submit_bid(&task.id, &AgentId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OpenTaskError::StateConflict { .. }));
    }

    #[tokio::test]
    async fn test_only_poster_closes_bidding_early() {
        let (registry, ledger) = registry_with(RegistryConfig::default());
        let poster = funded_poster(&ledger, 100).await;
        let task = registry
            .create_task(&poster, "Title", "Work", Amount::new(10))
            .await
            .unwrap();
        registry.submit_bid(&task.id, &AgentId::new()).await.unwrap();

        let err = registry
            .close_bidding(&task.id, &AgentId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OpenTaskError::NotAuthorized { .. }));
    }

    #[tokio::test]
    async fn test_close_bidding_without_bids_is_refused() {
        let (registry, ledger) = registry_with(RegistryConfig::default());
        let poster = funded_poster(&ledger, 100).await;
        let task = registry
            .create_task(&poster, "Title", "Work", Amount::new(10))
            .await
            .unwrap();

        let err = registry.close_bidding(&task.id, &poster).await.unwrap_err();
        assert!(matches!(err, OpenTaskError::Validation { .. }));

        // The task is still open; the deadline path owns expiry.
        let task = registry.get_task(&task.id).await.unwrap();
        assert_eq!(task.state, TaskState::BiddingOpen);
    }

    #[tokio::test]
    async fn test_only_assigned_worker_delivers() {
        let (registry, ledger) = registry_with(RegistryConfig::default());
        let poster = funded_poster(&ledger, 100).await;
        let worker = AgentId::new();
        let task = registry
            .create_task(&poster, "Title", "Work", Amount::new(10))
            .await
            .unwrap();
        registry.submit_bid(&task.id, &worker).await.unwrap();
        registry.close_bidding(&task.id, &poster).await.unwrap();

        let err = registry
            .submit_deliverable(&task.id, &AgentId::new(), "done")
            .await
            .unwrap_err();
        assert!(matches!(err, OpenTaskError::NotAuthorized { .. }));

        let task = registry
            .submit_deliverable(&task.id, &worker, "done")
            .await
            .unwrap();
        assert_eq!(task.state, TaskState::DeliveredPendingReview);
        assert!(task.review_deadline.is_some());
    }

    #[tokio::test]
    async fn test_reject_requires_a_claim() {
        let (registry, ledger) = registry_with(RegistryConfig::default());
        let poster = funded_poster(&ledger, 100).await;
        let worker = AgentId::new();
        let task = registry
            .create_task(&poster, "Title", "Work", Amount::new(10))
            .await
            .unwrap();
        registry.submit_bid(&task.id, &worker).await.unwrap();
        registry.close_bidding(&task.id, &poster).await.unwrap();
        registry
            .submit_deliverable(&task.id, &worker, "done")
            .await
            .unwrap();

        let err = registry.reject(&task.id, &poster, "  ").await.unwrap_err();
        assert!(matches!(err, OpenTaskError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_cancel_only_before_assignment() {
        let (registry, ledger) = registry_with(RegistryConfig::default());
        let poster = funded_poster(&ledger, 100).await;
        let worker = AgentId::new();
        let task = registry
            .create_task(&poster, "Title", "Work", Amount::new(40))
            .await
            .unwrap();
        registry.submit_bid(&task.id, &worker).await.unwrap();
        registry.close_bidding(&task.id, &poster).await.unwrap();

        let err = registry.cancel(&task.id, &poster).await.unwrap_err();
        assert!(matches!(err, OpenTaskError::StateConflict { .. }));
        assert_eq!(ledger.balance(&poster).await.locked, Amount::new(40));
    }

    #[tokio::test]
    async fn test_double_cancel_is_a_noop() {
        let (registry, ledger) = registry_with(RegistryConfig::default());
        let poster = funded_poster(&ledger, 100).await;
        let task = registry
            .create_task(&poster, "Title", "Work", Amount::new(40))
            .await
            .unwrap();

        let first = registry.cancel(&task.id, &poster).await.unwrap();
        assert_eq!(first.state, TaskState::Cancelled);
        let entries_after_first = ledger.entry_count().await;

        let second = registry.cancel(&task.id, &poster).await.unwrap();
        assert_eq!(second.state, TaskState::Cancelled);
        assert_eq!(second.version, first.version);
        assert_eq!(ledger.entry_count().await, entries_after_first);
        assert_eq!(ledger.balance(&poster).await.available, Amount::new(100));
    }

    #[tokio::test]
    async fn test_approve_requires_delivery() {
        let (registry, ledger) = registry_with(RegistryConfig::default());
        let poster = funded_poster(&ledger, 100).await;
        let task = registry
            .create_task(&poster, "Title", "Work", Amount::new(10))
            .await
            .unwrap();

        let err = registry.approve(&task.id, &poster).await.unwrap_err();
        assert!(matches!(err, OpenTaskError::StateConflict { .. }));
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let (registry, _ledger) = registry_with(RegistryConfig::default());
        let err = registry.get_task(&TaskId::new()).await.unwrap_err();
        assert!(matches!(err, OpenTaskError::TaskNotFound { .. }));
    }
}

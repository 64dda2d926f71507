//! Deadline sweep for OpenTask
//!
//! Periodically walks every non-terminal task and fires the timeout
//! transition its state is due for: expiring bidding windows (assigning a
//! winner when one exists), defaulting overdue executions, auto-approving
//! unreviewed deliveries, and driving open disputes to settlement.
//!
//! Invariants:
//! 1. The sweep holds no state of its own. Every decision is re-derived
//!    from the registry on each pass, so a crashed or restarted scheduler
//!    resumes with nothing to recover.
//! 2. A sweep pass is repeatable. Transitions it fires are idempotent in
//!    the registry, and anything another actor committed first is counted
//!    as skipped rather than retried.
//! 3. Multiple schedulers may sweep the same registry concurrently. The
//!    registry's version check lets exactly one instance win each
//!    transition; the loser observes a conflict and moves on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use opentask_registry::TaskRegistry;
use opentask_types::{OpenTaskError, Task, TaskState, TransitionActor};
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Scheduler errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,
    #[error("scheduler is not running")]
    NotRunning,
}

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between sweep passes
    pub sweep_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5),
        }
    }
}

/// Tally of one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Non-terminal tasks inspected
    pub examined: usize,
    /// Bidding windows that closed with a winner assigned
    pub assigned: usize,
    /// Bidding windows that closed with no eligible bids
    pub expired_unfilled: usize,
    /// Workers defaulted for missing the execution deadline
    pub defaulted: usize,
    /// Deliveries approved because the review window lapsed
    pub auto_approved: usize,
    /// Disputes driven to settlement
    pub disputes_resolved: usize,
    /// Transitions another actor committed first
    pub skipped: usize,
    /// Transitions that errored and were left for the next pass
    pub failed: usize,
}

impl SweepReport {
    /// Total transitions this pass committed
    pub fn applied(&self) -> usize {
        self.assigned + self.expired_unfilled + self.defaulted + self.auto_approved + self.disputes_resolved
    }
}

/// Background loop that fires deadline transitions on the registry
#[derive(Clone)]
pub struct DeadlineScheduler {
    registry: Arc<TaskRegistry>,
    config: SchedulerConfig,
    running: Arc<AtomicBool>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
    stop_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl DeadlineScheduler {
    /// Create a scheduler over the given registry
    pub fn new(registry: Arc<TaskRegistry>, config: SchedulerConfig) -> Self {
        Self {
            registry,
            config,
            running: Arc::new(AtomicBool::new(false)),
            task: Arc::new(Mutex::new(None)),
            stop_tx: Arc::new(Mutex::new(None)),
        }
    }

    /// Whether the background loop is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Start the periodic sweep loop
    pub async fn start(&self) -> Result<(), SchedulerError> {
        // Claim the flag in one swap; two racing starts must not both
        // spawn a loop and overwrite each other's stop channel.
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SchedulerError::AlreadyRunning);
        }

        info!(interval_ms = self.config.sweep_interval.as_millis() as u64, "starting deadline scheduler");

        let (stop_tx, mut stop_rx) = oneshot::channel();
        *self.stop_tx.lock().await = Some(stop_tx);

        let sweeper = self.clone();
        let running = self.running.clone();
        let interval = self.config.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        info!("deadline scheduler stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = sweeper.sweep_once(Utc::now()).await;
                        if report.applied() > 0 || report.failed > 0 {
                            info!(
                                examined = report.examined,
                                applied = report.applied(),
                                skipped = report.skipped,
                                failed = report.failed,
                                "deadline sweep committed transitions"
                            );
                        } else {
                            debug!(examined = report.examined, "deadline sweep found nothing due");
                        }
                    }
                }
            }
            running.store(false, Ordering::Relaxed);
        });

        *self.task.lock().await = Some(handle);
        Ok(())
    }

    /// Stop the loop and wait for the current pass to finish
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        if let Some(stop_tx) = self.stop_tx.lock().await.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        self.running.store(false, Ordering::Relaxed);
        Ok(())
    }

    /// Run a single sweep pass at the given instant
    ///
    /// Each non-terminal task is matched against the deadline its state is
    /// governed by; tasks not yet due are only counted as examined. Open
    /// disputes have no deadline and are driven on every pass until they
    /// settle.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for task in self.registry.non_terminal_tasks().await {
            report.examined += 1;

            let result = match task.state {
                TaskState::BiddingOpen => match task.bidding_deadline {
                    Some(deadline) if now >= deadline => {
                        self.registry.expire_bidding(&task.id, now).await
                    }
                    _ => continue,
                },
                TaskState::InExecution => match task.execution_deadline {
                    Some(deadline) if now > deadline => {
                        self.registry.default_execution(&task.id, now).await
                    }
                    _ => continue,
                },
                TaskState::DeliveredPendingReview => match task.review_deadline {
                    Some(deadline) if now > deadline => {
                        self.registry.approve_by_timeout(&task.id, now).await
                    }
                    _ => continue,
                },
                TaskState::Disputed => self.registry.resolve_dispute(&task.id).await,
                _ => continue,
            };

            match result {
                Ok(after) if Self::swept(&task, &after) => match after.state {
                    TaskState::InExecution => report.assigned += 1,
                    TaskState::ExpiredUnfilled => report.expired_unfilled += 1,
                    TaskState::Defaulted => report.defaulted += 1,
                    TaskState::Settled if task.state == TaskState::Disputed => {
                        report.disputes_resolved += 1
                    }
                    TaskState::Settled => report.auto_approved += 1,
                    _ => report.skipped += 1,
                },
                Ok(_) => report.skipped += 1,
                Err(
                    OpenTaskError::StateConflict { .. }
                    | OpenTaskError::ConcurrentModification { .. }
                    | OpenTaskError::DeadlineNotReached { .. },
                ) => report.skipped += 1,
                Err(err) => {
                    warn!(task_id = %task.id, state = %task.state, error = %err, "sweep transition failed");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Whether the returned task carries a transition this sweep committed
    ///
    /// Idempotent replays return the task unchanged, and a racing agent
    /// action bumps the version with an `Agent` hop; only a version bump
    /// whose latest hop came from the sweep or a registry-chained follow-on
    /// counts as applied.
    fn swept(before: &Task, after: &Task) -> bool {
        after.version > before.version
            && after.transitions.last().map_or(false, |t| {
                matches!(t.actor, TransitionActor::Scheduler | TransitionActor::System)
            })
    }
}

//! Reputation capability seam
//!
//! Settlement outcomes are published to an external reputation system
//! after a task reaches a terminal state. Publication is fire-and-forget:
//! a sink failure is logged and never rolls back the settlement.

use opentask_types::{Result, SettlementFeedback};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Consumer of settlement outcomes
#[async_trait]
pub trait ReputationSink: Send + Sync {
    /// Publish one settlement outcome
    async fn publish(&self, feedback: SettlementFeedback) -> Result<()>;
}

/// Sink that drops every outcome
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReputationSink;

#[async_trait]
impl ReputationSink for NullReputationSink {
    async fn publish(&self, feedback: SettlementFeedback) -> Result<()> {
        debug!(task_id = %feedback.task_id, "no reputation sink configured; feedback dropped");
        Ok(())
    }
}

/// Sink that records every outcome, for assertions in tests
#[derive(Clone, Default)]
pub struct RecordingSink {
    published: Arc<RwLock<Vec<SettlementFeedback>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, in publication order
    pub async fn published(&self) -> Vec<SettlementFeedback> {
        self.published.read().await.clone()
    }
}

#[async_trait]
impl ReputationSink for RecordingSink {
    async fn publish(&self, feedback: SettlementFeedback) -> Result<()> {
        self.published.write().await.push(feedback);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentask_types::{AgentId, Amount, SettlementOutcome, TaskId};

    #[tokio::test]
    async fn test_recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        for outcome in [SettlementOutcome::Approved, SettlementOutcome::Cancelled] {
            sink.publish(SettlementFeedback {
                task_id: TaskId::new(),
                poster: AgentId::new(),
                worker: None,
                outcome,
                paid_to_worker: Amount::zero(),
            })
            .await
            .unwrap();
        }

        let published = sink.published().await;
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].outcome, SettlementOutcome::Approved);
        assert_eq!(published[1].outcome, SettlementOutcome::Cancelled);
    }
}

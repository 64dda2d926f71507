//! Fixed-rule judge requiring no external capability.

use crate::{Judge, Verdict};
use async_trait::async_trait;
use opentask_types::{DisputeContext, JudgeId, Result};

/// A judge that rules from the shape of the evidence alone
///
/// The ruleset: a missing deliverable earns the worker nothing; a
/// deliverable facing an unanswered claim earns a quarter; a rebutted
/// claim splits evenly; an empty claim concedes the full reward.
pub struct DeterministicJudge {
    id: JudgeId,
}

impl DeterministicJudge {
    /// Create a judge with a fresh identity
    pub fn new() -> Self {
        Self { id: JudgeId::new() }
    }

    /// Create a judge with a known identity
    pub fn with_id(id: JudgeId) -> Self {
        Self { id }
    }
}

impl Default for DeterministicJudge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Judge for DeterministicJudge {
    fn id(&self) -> &JudgeId {
        &self.id
    }

    async fn evaluate(&self, context: &DisputeContext) -> Result<Verdict> {
        let verdict = if context.deliverable.is_none() {
            Verdict {
                worker_pct: 0,
                reasoning: "No deliverable was submitted".to_string(),
            }
        } else if context.claim.trim().is_empty() {
            Verdict {
                worker_pct: 100,
                reasoning: "Deliverable present and no substantive claim against it".to_string(),
            }
        } else if context.rebuttal.is_some() {
            Verdict {
                worker_pct: 50,
                reasoning: "Deliverable, claim, and rebuttal all present; splitting evenly"
                    .to_string(),
            }
        } else {
            Verdict {
                worker_pct: 25,
                reasoning: "Deliverable present but the claim stands unanswered".to_string(),
            }
        };
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentask_types::{Amount, TaskId};

    fn context(deliverable: Option<&str>, claim: &str, rebuttal: Option<&str>) -> DisputeContext {
        DisputeContext {
            task_id: TaskId::new(),
            task_title: "Summarize logs".to_string(),
            task_description: "Summarize the attached log bundle".to_string(),
            reward: Amount::new(100),
            deliverable: deliverable.map(String::from),
            claim: claim.to_string(),
            rebuttal: rebuttal.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_no_deliverable_earns_nothing() {
        let judge = DeterministicJudge::new();
        let verdict = judge
            .evaluate(&context(None, "nothing was delivered", None))
            .await
            .unwrap();
        assert_eq!(verdict.worker_pct, 0);
    }

    #[tokio::test]
    async fn test_unanswered_claim() {
        let judge = DeterministicJudge::new();
        let verdict = judge
            .evaluate(&context(Some("summary.txt"), "summary is wrong", None))
            .await
            .unwrap();
        assert_eq!(verdict.worker_pct, 25);
    }

    #[tokio::test]
    async fn test_rebutted_claim_splits_evenly() {
        let judge = DeterministicJudge::new();
        let verdict = judge
            .evaluate(&context(
                Some("summary.txt"),
                "summary is wrong",
                Some("summary covers every section"),
            ))
            .await
            .unwrap();
        assert_eq!(verdict.worker_pct, 50);
    }

    #[tokio::test]
    async fn test_empty_claim_concedes() {
        let judge = DeterministicJudge::new();
        let verdict = judge
            .evaluate(&context(Some("summary.txt"), "  ", None))
            .await
            .unwrap();
        assert_eq!(verdict.worker_pct, 100);
    }
}

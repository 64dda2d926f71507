//! Judge with a pre-set verdict, for rehearsing panel behavior.

use std::time::Duration;

use crate::{Judge, Verdict};
use async_trait::async_trait;
use opentask_types::{DisputeContext, JudgeId, OpenTaskError, Result};

/// A judge that always returns the same verdict
///
/// Optional latency and a failure mode make it possible to rehearse
/// quorum early-exit, timeouts, and failure isolation against a panel
/// without any external capability.
pub struct ScriptedJudge {
    id: JudgeId,
    worker_pct: u8,
    delay: Option<Duration>,
    fail: bool,
}

impl ScriptedJudge {
    /// A judge that votes the given percentage
    pub fn voting(worker_pct: u8) -> Self {
        Self {
            id: JudgeId::new(),
            worker_pct,
            delay: None,
            fail: false,
        }
    }

    /// A judge whose evaluation always fails
    pub fn failing() -> Self {
        Self {
            id: JudgeId::new(),
            worker_pct: 0,
            delay: None,
            fail: true,
        }
    }

    /// Sleep this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    fn id(&self) -> &JudgeId {
        &self.id
    }

    async fn evaluate(&self, _context: &DisputeContext) -> Result<Verdict> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(OpenTaskError::capability(
                "scripted-judge",
                "scripted failure",
            ));
        }
        Ok(Verdict {
            worker_pct: self.worker_pct,
            reasoning: format!("Scripted verdict of {}", self.worker_pct),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentask_types::{Amount, TaskId};

    fn context() -> DisputeContext {
        DisputeContext {
            task_id: TaskId::new(),
            task_title: "t".to_string(),
            task_description: "d".to_string(),
            reward: Amount::new(100),
            deliverable: None,
            claim: "c".to_string(),
            rebuttal: None,
        }
    }

    #[tokio::test]
    async fn test_scripted_vote() {
        let judge = ScriptedJudge::voting(80);
        let verdict = judge.evaluate(&context()).await.unwrap();
        assert_eq!(verdict.worker_pct, 80);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let judge = ScriptedJudge::failing();
        assert!(judge.evaluate(&context()).await.is_err());
    }
}

//! The judge trait and its verdict.

use async_trait::async_trait;
use opentask_types::{DisputeContext, JudgeId, Result};
use serde::{Deserialize, Serialize};

/// A judge's verdict on a dispute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Share of the escrow awarded to the worker, 0-100
    pub worker_pct: u8,
    /// The judge's reasoning
    pub reasoning: String,
}

/// Something that can evaluate a dispute
///
/// Implementors must tolerate being called concurrently; the coordinator
/// fans a dispute out to the whole panel at once.
#[async_trait]
pub trait Judge: Send + Sync {
    /// Stable identifier of this judge
    fn id(&self) -> &JudgeId;

    /// Evaluate the dispute context and produce a verdict
    async fn evaluate(&self, context: &DisputeContext) -> Result<Verdict>;
}

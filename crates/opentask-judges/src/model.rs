//! Judge backed by an external reasoning capability.

use std::sync::Arc;

use crate::{CompletionClient, CompletionRequest, Judge, Message, Verdict};
use async_trait::async_trait;
use opentask_types::{DisputeContext, JudgeId, OpenTaskError, Result};
use serde::Deserialize;

const VERDICT_SYSTEM_PROMPT: &str = r#"You are a neutral judge for disputed task deliverables. Output valid JSON only.

Schema:
{
  "worker_pct": 50,
  "reasoning": "explanation"
}

Rules:
- worker_pct is the share of the escrow the worker earned, 0-100
- Judge only from the material provided
- Be concise in reasoning"#;

/// Raw model output before validation
#[derive(Debug, Deserialize)]
struct RawVerdict {
    worker_pct: i64,
    reasoning: String,
}

/// A judge that consults an opaque completion capability
///
/// Model output is parsed and range-checked before it becomes a verdict;
/// malformed or out-of-range output is reported as a capability failure,
/// which the coordinator treats as a missing vote.
pub struct ModelJudge {
    id: JudgeId,
    client: Arc<dyn CompletionClient>,
}

impl ModelJudge {
    /// Create a judge with a fresh identity
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self {
            id: JudgeId::new(),
            client,
        }
    }

    /// Create a judge with a known identity
    pub fn with_id(id: JudgeId, client: Arc<dyn CompletionClient>) -> Self {
        Self { id, client }
    }
}

#[async_trait]
impl Judge for ModelJudge {
    fn id(&self) -> &JudgeId {
        &self.id
    }

    async fn evaluate(&self, context: &DisputeContext) -> Result<Verdict> {
        let user = format!(
            "Task: {}\nDescription: {}\nReward: {}\nDeliverable: {}\nClaim: {}\nRebuttal: {}\n\nAward the worker's percentage.",
            context.task_title,
            context.task_description,
            context.reward,
            context.deliverable.as_deref().unwrap_or("None"),
            context.claim,
            context.rebuttal.as_deref().unwrap_or("None"),
        );

        let request = CompletionRequest::new(vec![Message::user(user)])
            .with_system(VERDICT_SYSTEM_PROMPT)
            .with_json_mode()
            .with_max_tokens(256);

        let content = self.client.complete(request).await?;
        parse_verdict(&content)
    }
}

/// Parse and validate a model verdict
///
/// Rejects anything that is not clean JSON with `worker_pct` in 0-100.
pub fn parse_verdict(content: &str) -> Result<Verdict> {
    let raw: RawVerdict = serde_json::from_str(content.trim()).map_err(|e| {
        OpenTaskError::capability("completion", format!("unparseable verdict: {e}"))
    })?;

    if !(0..=100).contains(&raw.worker_pct) {
        return Err(OpenTaskError::capability(
            "completion",
            format!("worker_pct {} out of range", raw.worker_pct),
        ));
    }

    Ok(Verdict {
        worker_pct: raw.worker_pct as u8,
        reasoning: raw.reasoning,
    })
}

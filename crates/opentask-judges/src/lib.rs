//! OpenTask Judges - Verdict capability for dispute resolution
//!
//! A judge turns a dispute context into a verdict: the share of the escrow
//! the worker earned (0-100) plus reasoning. Judges come in three flavors:
//!
//! - [`DeterministicJudge`]: fixed ruleset, no external capability
//! - [`ModelJudge`]: consults an opaque completion capability and
//!   validates its JSON output before anything downstream sees it
//! - [`ScriptedJudge`]: pre-set verdicts with optional latency or failure,
//!   for rehearsing panel behavior
//!
//! A judge that errors contributes no vote; it never poisons the panel.

pub mod completion;
pub mod deterministic;
pub mod judge;
pub mod model;
pub mod scripted;

pub use completion::{CompletionClient, CompletionRequest, Message, MessageRole};
pub use deterministic::DeterministicJudge;
pub use judge::{Judge, Verdict};
pub use model::ModelJudge;
pub use scripted::ScriptedJudge;

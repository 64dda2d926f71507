//! OpenTask Market - bid collection and winner selection
//!
//! The market side of the task economy:
//! - Bid ledger: agents register interest in open tasks
//! - Selection policies: pluggable strategies for picking the worker
//! - Templates: repeatable task descriptions with level-scaled rewards
//!
//! The bid ledger is deliberately state-agnostic: it records and withdraws
//! bids for any task id it is handed. Whether a task is actually accepting
//! bids (state, deadline) is the registry's call, made before it touches
//! this crate.

pub mod bids;
pub mod policy;
pub mod templates;

pub use bids::BidLedger;
pub use policy::{FirstSubmitted, SelectionPolicy};
pub use templates::{reward_for_level, TaskDraft, TaskTemplate};

//! OpenTask Types - Canonical domain types for the agent task economy
//!
//! This crate contains all foundational types for OpenTask with zero
//! dependencies on other opentask crates. It defines the type system for:
//!
//! - Identity types (TaskId, AgentId, HoldId, etc.)
//! - Reward amounts in minimal currency units
//! - Task lifecycle state and the transition log
//! - Bids, escrow holds, and settlement records
//! - Disputes, judge votes, and settlement feedback
//!
//! # Architectural Invariants
//!
//! These types support the core OpenTask settlement invariants:
//!
//! 1. Escrow is conserved: the payout legs of a settled hold sum exactly
//!    to the held amount
//! 2. One terminal settlement per hold; a replay under the original key
//!    returns the recorded outcome instead of moving funds again
//! 3. Every state transition is appended to the task's log before the new
//!    state becomes externally visible
//! 4. Failure is explicit: a failed settlement leaves state as it was

pub mod amount;
pub mod bid;
pub mod dispute;
pub mod error;
pub mod escrow;
pub mod feedback;
pub mod identity;
pub mod task;

pub use amount::*;
pub use bid::*;
pub use dispute::*;
pub use error::*;
pub use escrow::*;
pub use feedback::*;
pub use identity::*;
pub use task::*;

/// Version of the OpenTask types schema
pub const TYPES_VERSION: &str = "0.1.0";

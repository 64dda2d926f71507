//! OpenTask Registry - the task lifecycle state machine
//!
//! The registry owns every task record and orchestrates the other engines
//! around the lifecycle: escrow hold at creation, winner selection at the
//! close of bidding, review settlement, and dispute routing.
//!
//! Invariants:
//! 1. Every escrow movement runs under a key derived from the task id and
//!    the operation, so a retried transition replays its settlement
//!    instead of paying twice.
//! 2. A transition is appended to the task's log before the new state is
//!    externally visible.
//! 3. Duplicate triggers of an applied action are no-ops returning the
//!    applied result; anything else out of order is a `StateConflict`.
//! 4. Settlement failures leave the task in its pre-settlement state; no
//!    operation partially mutates the ledger and the task record.

pub mod config;
pub mod registry;
pub mod reputation;

pub use config::RegistryConfig;
pub use registry::TaskRegistry;
pub use reputation::{NullReputationSink, RecordingSink, ReputationSink};

//! Error types for OpenTask
//!
//! Failure is explicit. A settlement that cannot complete leaves the task
//! in its pre-settlement state rather than guessing at a partial outcome.

use thiserror::Error;

/// Result type for OpenTask operations
pub type Result<T> = std::result::Result<T, OpenTaskError>;

/// OpenTask error types
#[derive(Debug, Clone, Error)]
pub enum OpenTaskError {
    // ========================================================================
    // Lookup Errors
    // ========================================================================

    /// Task not found
    #[error("Task {task_id} not found")]
    TaskNotFound { task_id: String },

    /// Bid not found
    #[error("No bid from {bidder} on task {task_id}")]
    BidNotFound { task_id: String, bidder: String },

    /// Dispute not found
    #[error("Dispute {dispute_id} not found")]
    DisputeNotFound { dispute_id: String },

    /// Escrow hold not found
    #[error("Escrow hold {hold_id} not found")]
    HoldNotFound { hold_id: String },

    /// Account not found
    #[error("Account {account} not found")]
    AccountNotFound { account: String },

    // ========================================================================
    // State Errors
    // ========================================================================

    /// Operation not valid in the entity's current state
    #[error("Cannot {operation} {entity} in state {current}")]
    StateConflict {
        entity: String,
        current: String,
        operation: String,
    },

    /// Version stamp moved underneath an in-flight operation
    #[error("Concurrent modification of {entity}: expected version {expected}, found {found}")]
    ConcurrentModification {
        entity: String,
        expected: u64,
        found: u64,
    },

    /// Deadline has not elapsed yet
    #[error("Cannot {operation} {entity} before {deadline}")]
    DeadlineNotReached {
        entity: String,
        operation: String,
        deadline: String,
    },

    // ========================================================================
    // Funds Errors
    // ========================================================================

    /// Insufficient available funds
    #[error(
        "Insufficient funds in account {account}: requested {requested}, available {available}"
    )]
    InsufficientFunds {
        account: String,
        requested: u64,
        available: u64,
    },

    /// Amount overflow during arithmetic
    #[error("Amount overflow during arithmetic operation")]
    AmountOverflow,

    // ========================================================================
    // Authorization Errors
    // ========================================================================

    /// Agent is not the party this operation is reserved for
    #[error("Agent {agent} may not {operation}: {reason}")]
    NotAuthorized {
        agent: String,
        operation: String,
        reason: String,
    },

    // ========================================================================
    // Capability Errors
    // ========================================================================

    /// An external capability failed or returned unusable output
    #[error("Capability {capability} failed: {reason}")]
    ExternalCapability { capability: String, reason: String },

    /// Too few judge votes arrived to resolve a dispute
    #[error("Only {votes} of {quorum} required judge votes arrived")]
    QuorumNotReached { votes: usize, quorum: usize },

    // ========================================================================
    // General Errors
    // ========================================================================

    /// Invalid input
    #[error("Invalid input: {field} - {reason}")]
    Validation { field: String, reason: String },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl OpenTaskError {
    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a state conflict error
    pub fn state_conflict(
        entity: impl Into<String>,
        current: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self::StateConflict {
            entity: entity.into(),
            current: current.into(),
            operation: operation.into(),
        }
    }

    /// Create an external capability error
    pub fn capability(capability: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExternalCapability {
            capability: capability.into(),
            reason: reason.into(),
        }
    }

    /// Check if this is a retriable error
    ///
    /// A concurrent-modification loser can retry immediately: every
    /// lifecycle operation is idempotent under its derived key.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentModification { .. } | Self::Internal { .. }
        )
    }

    /// Get an error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::TaskNotFound { .. } => "TASK_NOT_FOUND",
            Self::BidNotFound { .. } => "BID_NOT_FOUND",
            Self::DisputeNotFound { .. } => "DISPUTE_NOT_FOUND",
            Self::HoldNotFound { .. } => "HOLD_NOT_FOUND",
            Self::AccountNotFound { .. } => "ACCOUNT_NOT_FOUND",
            Self::StateConflict { .. } => "STATE_CONFLICT",
            Self::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            Self::DeadlineNotReached { .. } => "DEADLINE_NOT_REACHED",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::AmountOverflow => "AMOUNT_OVERFLOW",
            Self::NotAuthorized { .. } => "NOT_AUTHORIZED",
            Self::ExternalCapability { .. } => "EXTERNAL_CAPABILITY",
            Self::QuorumNotReached { .. } => "QUORUM_NOT_REACHED",
            Self::Validation { .. } => "VALIDATION",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = OpenTaskError::InsufficientFunds {
            account: "agent_test".to_string(),
            requested: 100,
            available: 50,
        };
        assert_eq!(err.error_code(), "INSUFFICIENT_FUNDS");
    }

    #[test]
    fn test_retriable_errors() {
        let conflict = OpenTaskError::ConcurrentModification {
            entity: "task_test".to_string(),
            expected: 3,
            found: 4,
        };
        assert!(conflict.is_retriable());

        let not_found = OpenTaskError::TaskNotFound {
            task_id: "task_test".to_string(),
        };
        assert!(!not_found.is_retriable());
    }

    #[test]
    fn test_state_conflict_message() {
        let err = OpenTaskError::state_conflict("task_x", "settled", "reject");
        assert_eq!(err.to_string(), "Cannot reject task_x in state settled");
    }
}

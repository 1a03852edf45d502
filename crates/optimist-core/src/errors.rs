//! Error types for the optimistic update engine
//!
//! Two families live here:
//! - ledger misuse (`LedgerError`), which signals a broken invariant in the
//!   caller and is never caught by the orchestrator;
//! - external failures (`RemoteError`, `WaitError`), which always end in a
//!   revert before they are re-raised as a `TransactionError`.

use crate::identifiers::{EntityKey, TransactionId};
use crate::ledger::UpdateStatus;
use std::time::Duration;

/// Ledger misuse. These indicate programming errors, not user-recoverable
/// conditions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// `begin` was called with an identifier the ledger has already seen
    #[error("Duplicate transaction: {transaction_id}")]
    DuplicateTransaction {
        /// Offending transaction identifier
        transaction_id: TransactionId,
    },

    /// `confirm`/`revert` for an identifier the ledger never registered
    #[error("Unknown transaction: {transaction_id}")]
    UnknownTransaction {
        /// Offending transaction identifier
        transaction_id: TransactionId,
    },

    /// `confirm`/`revert` for a record that already left `Pending`
    #[error("Transaction {transaction_id} already resolved as {status}")]
    AlreadyResolved {
        /// Offending transaction identifier
        transaction_id: TransactionId,
        /// Terminal status the record reached
        status: UpdateStatus,
    },
}

impl LedgerError {
    /// Transaction the error refers to
    pub fn transaction_id(&self) -> TransactionId {
        match self {
            Self::DuplicateTransaction { transaction_id }
            | Self::UnknownTransaction { transaction_id }
            | Self::AlreadyResolved { transaction_id, .. } => *transaction_id,
        }
    }
}

/// Opaque failure reported by the remote action client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{action}: {message}")]
pub struct RemoteError {
    /// Action that failed
    pub action: String,
    /// Client-supplied description (rejection reason, transport failure, ...)
    pub message: String,
}

impl RemoteError {
    /// Create a remote error for an action
    pub fn new(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            message: message.into(),
        }
    }
}

/// Why a change wait ended without its predicate being satisfied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    /// The predicate was not satisfied before the deadline
    #[error("Timed out after {after:?} waiting for entity {key}")]
    Timeout {
        /// Entity being watched
        key: EntityKey,
        /// Configured bound
        after: Duration,
    },

    /// The wait was cancelled by its owner
    #[error("Wait for entity {key} was cancelled")]
    Cancelled {
        /// Entity being watched
        key: EntityKey,
    },

    /// The store went away while the wait was pending
    #[error("Entity store closed while waiting for entity {key}")]
    StoreClosed {
        /// Entity being watched
        key: EntityKey,
    },
}

impl WaitError {
    /// Entity the wait was registered on
    pub fn key(&self) -> &EntityKey {
        match self {
            Self::Timeout { key, .. } | Self::Cancelled { key } | Self::StoreClosed { key } => key,
        }
    }

    /// Check if the wait ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Outcome of a failed optimistic transaction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    /// Ledger misuse; nothing was reverted on the caller's behalf
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The remote action failed; the optimistic patch was reverted
    #[error("Remote action failed for {transaction_id}: {source}")]
    RemoteActionFailed {
        /// Reverted transaction
        transaction_id: TransactionId,
        /// Client error
        source: RemoteError,
    },

    /// The remote action succeeded but the confirmation predicate never
    /// held; the optimistic patch was reverted
    #[error("Confirmation for {transaction_id} timed out after {after:?}")]
    WaitTimeout {
        /// Reverted transaction
        transaction_id: TransactionId,
        /// Configured bound
        after: Duration,
    },

    /// The confirmation wait ended for another reason (cancelled, store
    /// closed); the optimistic patch was reverted
    #[error("Confirmation for {transaction_id} aborted: {source}")]
    WaitAborted {
        /// Reverted transaction
        transaction_id: TransactionId,
        /// Underlying wait error
        source: WaitError,
    },
}

impl TransactionError {
    /// True for ledger misuse, which indicates a core invariant violation
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::Ledger(_))
    }

    /// True when the engine reverted the optimistic patch before failing
    pub fn triggered_revert(&self) -> bool {
        !self.is_invariant_violation()
    }

    /// Transaction the error refers to
    pub fn transaction_id(&self) -> TransactionId {
        match self {
            Self::Ledger(err) => err.transaction_id(),
            Self::RemoteActionFailed { transaction_id, .. }
            | Self::WaitTimeout { transaction_id, .. }
            | Self::WaitAborted { transaction_id, .. } => *transaction_id,
        }
    }

    /// Short machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Ledger(LedgerError::DuplicateTransaction { .. }) => "LEDGER_DUPLICATE",
            Self::Ledger(LedgerError::UnknownTransaction { .. }) => "LEDGER_UNKNOWN",
            Self::Ledger(LedgerError::AlreadyResolved { .. }) => "LEDGER_RESOLVED",
            Self::RemoteActionFailed { .. } => "REMOTE_FAILED",
            Self::WaitTimeout { .. } => "WAIT_TIMEOUT",
            Self::WaitAborted { .. } => "WAIT_ABORTED",
        }
    }
}

/// Configuration loading and validation failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// Path that failed
        path: String,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// The config text is not valid TOML for this schema
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override could not be parsed
    #[error("Invalid value for {key}: {value}")]
    InvalidOverride {
        /// Environment variable name
        key: String,
        /// Raw value
        value: String,
    },

    /// A loaded value is out of range
    #[error("Invalid: {message}")]
    Invalid {
        /// What is wrong
        message: String,
    },
}

impl ConfigError {
    /// Create a validation error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_errors_are_invariant_violations() {
        let tx = TransactionId::new();
        let err = TransactionError::from(LedgerError::UnknownTransaction { transaction_id: tx });
        assert!(err.is_invariant_violation());
        assert!(!err.triggered_revert());
        assert_eq!(err.transaction_id(), tx);
        assert_eq!(err.code(), "LEDGER_UNKNOWN");
    }

    #[test]
    fn test_remote_failure_display() {
        let tx = TransactionId::new();
        let err = TransactionError::RemoteActionFailed {
            transaction_id: tx,
            source: RemoteError::new("spawn", "execution reverted"),
        };
        assert!(err.triggered_revert());
        assert_eq!(
            err.to_string(),
            format!("Remote action failed for {tx}: spawn: execution reverted")
        );
    }

    #[test]
    fn test_already_resolved_display() {
        let tx = TransactionId::new();
        let err = LedgerError::AlreadyResolved {
            transaction_id: tx,
            status: UpdateStatus::Confirmed,
        };
        assert_eq!(err.to_string(), format!("Transaction {tx} already resolved as Confirmed"));
    }

    #[test]
    fn test_wait_error_key() {
        let err = WaitError::Cancelled {
            key: EntityKey::from("0x1"),
        };
        assert_eq!(err.key().as_str(), "0x1");
        assert!(!err.is_timeout());
    }
}

//! Token operation errors
//!
//! Every failure surfaced by the token helpers falls into one of these
//! categories. Errors are returned as-is to the caller: nothing is retried and
//! no on-chain side effect is rolled back.

use alloy::primitives::{Address, TxHash};
use std::time::Duration;
use thiserror::Error;

/// Result alias used across the crate's chain-facing API
pub type Result<T> = std::result::Result<T, TokenOpsError>;

#[derive(Debug, Error)]
pub enum TokenOpsError {
    /// The session lock could not be taken or the nonce could not be refreshed
    #[error("failed to lock nonce: {0}")]
    Lock(String),

    /// The contract at `address` could not be bound
    #[error("failed to bind {kind} contract at {address}: {reason}")]
    Binding {
        kind: &'static str,
        address: Address,
        reason: String,
    },

    /// The node rejected the transaction
    #[error("{action} submission rejected: {reason}")]
    Submission {
        action: &'static str,
        reason: String,
    },

    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: TxHash },

    #[error("transaction {tx_hash} not confirmed after {timeout:?}")]
    Timeout { tx_hash: TxHash, timeout: Duration },

    #[error("wait for transaction {tx_hash} was cancelled")]
    Cancelled { tx_hash: TxHash },

    /// Receipt lookup failed while waiting for confirmation
    #[error("failed to confirm transaction {tx_hash}: {reason}")]
    Confirmation { tx_hash: TxHash, reason: String },

    /// A read-only contract call failed
    #[error("{call} call failed: {reason}")]
    Call { call: &'static str, reason: String },

    /// Deploy bytecode is missing or malformed
    #[error("contract artifact error: {0}")]
    Artifact(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TokenOpsError {
    /// True for the errors raised while waiting on an already submitted transaction
    pub fn is_confirmation_failure(&self) -> bool {
        matches!(
            self,
            TokenOpsError::Reverted { .. }
                | TokenOpsError::Timeout { .. }
                | TokenOpsError::Cancelled { .. }
                | TokenOpsError::Confirmation { .. }
        )
    }

    pub(crate) fn submission(action: &'static str, err: impl std::fmt::Display) -> Self {
        TokenOpsError::Submission {
            action,
            reason: err.to_string(),
        }
    }

    pub(crate) fn call(call: &'static str, err: impl std::fmt::Display) -> Self {
        TokenOpsError::Call {
            call,
            reason: err.to_string(),
        }
    }
}

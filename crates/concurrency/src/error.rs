//! Error types for the concurrency layer
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use crate::state::StateId;
use thiserror::Error;

/// Result type alias for concurrency operations
pub type Result<T> = std::result::Result<T, ConcurrencyError>;

/// Errors raised while acquiring locks or waiting on transactions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConcurrencyError {
    /// The caller's execution context was cancelled while waiting
    #[error("context cancelled while waiting")]
    Cancelled,

    /// Waiting for another transaction is not permitted in the caller's context
    #[error("waiting for transaction {holder} is not allowed in this context")]
    WaitRefused {
        /// Transaction currently holding the value
        holder: String,
    },

    /// The wait for another transaction exceeded the configured timeout
    #[error("timed out after {millis}ms waiting for transaction {holder}")]
    WaitTimeout {
        /// Transaction currently holding the value
        holder: String,
        /// Timeout in milliseconds
        millis: u64,
    },

    /// Operation on a transaction that is no longer active
    #[error("transaction {id} is not active ({status})")]
    TransactionNotActive {
        /// Transaction id
        id: String,
        /// Current status
        status: String,
    },

    /// A shared value was unlocked by a state that does not hold it
    #[error("value is not locked by {0}")]
    NotHolder(StateId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_wait_refused() {
        let err = ConcurrencyError::WaitRefused {
            holder: "tx-1".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("not allowed"));
        assert!(msg.contains("tx-1"));
    }

    #[test]
    fn test_error_display_timeout() {
        let err = ConcurrencyError::WaitTimeout {
            holder: "tx-2".to_string(),
            millis: 50,
        };
        assert!(err.to_string().contains("50ms"));
    }
}

//! Error types for the Turnstile executor.

use std::fmt;

/// Errors surfaced by executor operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// The combined population of pending requests and unpolled responses
    /// has reached `max_handle_requests_and_responses`.
    PoolFull,
    /// A batch item was accepted or rejected more than once, or the token
    /// was never part of the batch's queue.
    AlreadyResolved,
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PoolFull => {
                write!(
                    f,
                    "Request/response pool is full; poll or clean up old responses first"
                )
            }
            Self::AlreadyResolved => {
                write!(f, "Cannot accept or reject the same token twice")
            }
        }
    }
}

impl std::error::Error for ExecutorError {}

/// A specialized Result type for executor operations.
pub type Result<T> = std::result::Result<T, ExecutorError>;

//! Error types for the routing module.

use std::fmt;

use turnstile_core::ExecutorError;

use crate::value::ValueTuple;

/// Routing-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// The dispatch value was an empty tuple.
    EmptyValue,
    /// The dispatch value's arity differs from earlier registrations.
    ArityMismatch {
        /// Arity fixed by the first registration.
        expected: usize,
        /// Arity of the offending value.
        got: usize,
    },
    /// The dispatch value is already registered.
    DuplicateValue(ValueTuple),
    /// The executor tag is not a key of the pool.
    UnknownExecutorTag(String),
    /// Pool mode requires an executor tag at registration.
    MissingExecutorTag,
    /// Two pool tags hashed to the same prefix.
    TagHashCollision(String),
    /// The dispatch value has no registered processor pair.
    UnregisteredValue(ValueTuple),
    /// The preprocessor reported a failure.
    Preprocess(String),
    /// The underlying executor rejected the submission.
    Executor(ExecutorError),
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyValue => write!(f, "Dispatch value must be a nonempty tuple"),
            Self::ArityMismatch { expected, got } => {
                write!(
                    f,
                    "Dispatch value arity {got} does not match earlier registrations ({expected})"
                )
            }
            Self::DuplicateValue(value) => {
                write!(f, "Dispatch value {value} is already registered")
            }
            Self::UnknownExecutorTag(tag) => {
                write!(f, "Executor tag {tag:?} is not a key of the executor pool")
            }
            Self::MissingExecutorTag => {
                write!(f, "Pool mode requires an executor tag for each registration")
            }
            Self::TagHashCollision(tag) => {
                write!(f, "Executor tag {tag:?} collides with another tag's hash")
            }
            Self::UnregisteredValue(value) => {
                write!(f, "Dispatch value {value} is not registered")
            }
            Self::Preprocess(msg) => write!(f, "Preprocessing failed: {msg}"),
            Self::Executor(err) => write!(f, "Executor error: {err}"),
        }
    }
}

impl std::error::Error for RouterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Executor(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ExecutorError> for RouterError {
    fn from(err: ExecutorError) -> Self {
        Self::Executor(err)
    }
}

/// A specialized Result type for routing operations.
pub type Result<T> = std::result::Result<T, RouterError>;

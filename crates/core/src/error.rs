//! Store-level error kinds.
//!
//! One flat enum per the propagation policy: transient engine failures are
//! retried inside `with_transaction`, everything else aborts the operation
//! and surfaces with its originating kind. Nothing is swallowed.

use thiserror::Error;

use crate::index::IndexState;
use crate::kv::{KvError, MaybeRetryable};
use crate::subspace::SubspaceError;
use crate::tuple::{TupleError, Value};

#[derive(Debug, Error)]
pub enum StoreError {
    /// An index was asked to do something its lifecycle state forbids.
    #[error("index {index} is {state}, not usable for this operation")]
    StateViolation { index: String, state: IndexState },

    #[error(
        "uniqueness violation on index {index}: value ({}) already taken by 0x{}, rejected for 0x{}",
        format_values(.value),
        hex::encode(.existing),
        hex::encode(.incoming)
    )]
    UniquenessViolation {
        index: String,
        value: Vec<Value>,
        /// Packed primary key tuple already holding the value.
        existing: Vec<u8>,
        /// Packed primary key tuple of the rejected record.
        incoming: Vec<u8>,
    },

    #[error("decode failure: {0}")]
    DecodeFailure(String),

    #[error("value of {size} bytes exceeds the configured limit of {limit}")]
    SizeLimitExceeded { size: usize, limit: usize },

    #[error("access denied: {0}")]
    SecurityDenied(String),

    #[error("transient engine failure")]
    KvTransient(#[source] KvError),

    #[error("fatal engine failure")]
    KvFatal(#[source] KvError),

    #[error("validation failure: {0}")]
    ValidationFailure(String),

    /// Min/max/average read over a group with no contributing records.
    #[error("no value for group on index {index}")]
    EmptyGroup { index: String },
}

fn format_values(values: &[Value]) -> String {
    values
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl StoreError {
    pub fn decode(detail: impl std::fmt::Display) -> Self {
        StoreError::DecodeFailure(detail.to_string())
    }

    pub fn validation(detail: impl std::fmt::Display) -> Self {
        StoreError::ValidationFailure(detail.to_string())
    }
}

impl From<KvError> for StoreError {
    fn from(error: KvError) -> Self {
        match error {
            KvError::Conflict
            | KvError::TimedOut
            | KvError::Cancelled
            | KvError::Transient(_) => StoreError::KvTransient(error),
            KvError::Unavailable(_) | KvError::Configuration(_) => StoreError::KvFatal(error),
        }
    }
}

impl From<TupleError> for StoreError {
    fn from(error: TupleError) -> Self {
        StoreError::DecodeFailure(error.to_string())
    }
}

impl From<SubspaceError> for StoreError {
    fn from(error: SubspaceError) -> Self {
        StoreError::DecodeFailure(error.to_string())
    }
}

impl MaybeRetryable for StoreError {
    fn is_retryable(&self) -> bool {
        match self {
            StoreError::KvTransient(inner) => inner.is_retryable(),
            _ => false,
        }
    }
}

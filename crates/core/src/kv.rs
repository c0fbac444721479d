//! Contract for the underlying ordered, transactional KV engine.
//!
//! The store never talks to a concrete engine directly; everything goes
//! through these traits. An engine must provide strictly serializable
//! transactions, ordered range scans, an 8-byte little-endian atomic add,
//! optimistic conflict detection with automatic retry in
//! [`KvEngine::with_transaction`], and range size estimates.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub type Key = Vec<u8>;
pub type KeyValue = (Vec<u8>, Vec<u8>);

/// Caller-supplied cancellation cause. Setting the flag aborts the
/// transaction at its next suspension point; nothing partial becomes
/// durable.
pub type CancelFlag = Arc<AtomicBool>;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("transaction conflict")]
    Conflict,

    #[error("transaction timed out")]
    TimedOut,

    #[error("transaction cancelled by caller")]
    Cancelled,

    #[error("transient engine error: {0}")]
    Transient(String),

    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("bad engine configuration: {0}")]
    Configuration(String),
}

impl KvError {
    /// Whether [`KvEngine::with_transaction`] should retry the body.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KvError::Conflict | KvError::Transient(_))
    }
}

/// Marker implemented by error types flowing through `with_transaction` so
/// the engine can decide whether a failed attempt is worth retrying.
pub trait MaybeRetryable {
    fn is_retryable(&self) -> bool;
}

impl MaybeRetryable for KvError {
    fn is_retryable(&self) -> bool {
        KvError::is_retryable(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    #[default]
    Default,
    /// Background work; the engine may deprioritize it.
    Batch,
    Immediate,
}

/// Hint for how a range scan will be consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamingMode {
    #[default]
    Iterator,
    WantAll,
    Exact,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionConfig {
    pub timeout: Option<Duration>,
    pub retry_limit: Option<u32>,
    pub priority: Priority,
    /// When set and flipped to true, in-flight attempts abort with
    /// [`KvError::Cancelled`] instead of committing.
    pub cancel: Option<CancelFlag>,
}

impl TransactionConfig {
    pub fn batch() -> Self {
        Self {
            priority: Priority::Batch,
            ..Self::default()
        }
    }
}

/// A range scan request over `[begin, end)`.
#[derive(Debug, Clone)]
pub struct RangeScan {
    pub begin: Vec<u8>,
    pub end: Vec<u8>,
    pub limit: Option<usize>,
    pub reverse: bool,
    /// Snapshot reads do not participate in conflict detection.
    pub snapshot: bool,
    pub mode: StreamingMode,
}

impl RangeScan {
    pub fn new(begin: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        Self {
            begin: begin.into(),
            end: end.into(),
            limit: None,
            reverse: false,
            snapshot: false,
            mode: StreamingMode::default(),
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn snapshot(mut self) -> Self {
        self.snapshot = true;
        self
    }

    pub fn mode(mut self, mode: StreamingMode) -> Self {
        self.mode = mode;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOption {
    Priority(Priority),
    Timeout(Duration),
}

/// One open transaction against the engine.
///
/// Reads observe a consistent snapshot; writes become visible to later reads
/// in the same transaction and durable only at commit.
pub trait KvTransaction {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;

    fn set(&mut self, key: &[u8], value: &[u8]);

    fn clear(&mut self, key: &[u8]);

    fn clear_range(&mut self, begin: &[u8], end: &[u8]);

    /// Interpret the stored value as an 8-byte little-endian integer and add
    /// `delta` to it atomically. Missing values count as zero; short values
    /// are zero-extended.
    fn atomic_add(&mut self, key: &[u8], delta: i64);

    fn get_range(&mut self, scan: RangeScan) -> Result<Vec<KeyValue>, KvError>;

    /// A cheap estimate of the byte size of `[begin, end)`, keys and values
    /// included.
    fn estimated_range_size(&mut self, begin: &[u8], end: &[u8]) -> Result<i64, KvError>;

    fn set_option(&mut self, option: TransactionOption);
}

/// An engine handle, cheap to clone and shared across operations.
pub trait KvEngine: Clone + Send + Sync + 'static {
    type Tx: KvTransaction;

    /// Run `body` inside one transaction, committing on success. Attempts
    /// that fail with a retryable error are re-run from a fresh snapshot,
    /// bounded by the config's retry limit and timeout; the body must
    /// therefore be idempotent.
    fn with_transaction<T, E, F>(&self, config: &TransactionConfig, body: F) -> Result<T, E>
    where
        E: From<KvError> + MaybeRetryable,
        F: FnMut(&mut Self::Tx) -> Result<T, E>;
}

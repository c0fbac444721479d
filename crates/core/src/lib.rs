//! Traits and machinery shared by all lodestone crates.
//!
//! Glossary:
//!  - `tuple`: an ordered sequence of typed scalars with an order-preserving
//!    binary encoding; primary keys and index values are tuples.
//!  - `subspace`: an immutable byte prefix carving the KV key space into a
//!    disjoint region.
//!  - `record`: a typed entity with a declared field table and index set,
//!    stored as an opaque blob under its primary key tuple.

pub mod error;
pub mod index;
pub mod kv;
pub mod record;
pub mod subspace;
pub mod tuple;

pub use error::StoreError;
pub use index::{
    GraphDirection, IndexDescriptor, IndexKind, IndexState, DEFAULT_DISTINCT_PRECISION,
};
pub use kv::{
    CancelFlag, KvEngine, KvError, KvTransaction, MaybeRetryable, Priority, RangeScan,
    StreamingMode, TransactionConfig, TransactionOption,
};
pub use record::{FieldCardinality, FieldDescriptor, KeyPath, Record, RecordType};
pub use subspace::{Subspace, SubspaceError};
pub use tuple::{pack, unpack, Value};

/// Result alias used across the store crates.
pub type StoreResult<T> = Result<T, StoreError>;

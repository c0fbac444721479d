//! An indexed record store layered on ordered key-value engines.
//!
//! The store persists typed records and keeps a family of secondary
//! indexes consistent with them inside the engine's transactions: scalar
//! and uniqueness indexes, counters, sums, min/max, averages,
//! distinct-approximation sketches, bitmaps, graph adjacency, and
//! time-windowed leaderboards. Queries go through a planner that serves
//! predicates from a readable index when one matches and falls back to a
//! filtered type scan otherwise.
//!
//! The underlying engine is anything implementing the
//! [`lodestone_core::KvEngine`] contract: strictly serializable
//! transactions over an ordered key space with range scans, atomic adds,
//! and optimistic retry.

pub mod codec;
pub mod hll;
pub mod items;
pub mod layout;
pub mod maintain;
pub mod migrate;
pub mod query;
pub mod state;
pub mod store;
pub mod violations;

pub use items::ItemConfig;
pub use layout::StoreLayout;
pub use migrate::{MigrationController, SchemaVersion};
pub use query::{Bound, CompareOp, Predicate, Query, SortDescriptor};
pub use store::{
    AdminOperation, AllowAll, MetricsDelegate, Neighbor, NoopMetrics, RecordStore,
    SecurityDelegate, Standing, StoreConfig, StoreTransaction,
};
pub use violations::Violation;

pub use lodestone_core::{
    GraphDirection, IndexDescriptor, IndexKind, IndexState, KvEngine, KvError, Record,
    StoreError, Subspace, TransactionConfig, Value,
};

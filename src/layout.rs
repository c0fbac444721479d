//! The store's key-space layout.
//!
//! Every key the store writes lives under the root prefix, in one of four
//! regions:
//!
//! - `items/<type>/<pk…>` — record blobs (or external-value stubs)
//! - `blobs/<blob-id>/<chunk>` — chunked values above the inline threshold
//! - `indexes/<name>/…` — index payload, shaped per index kind
//! - `_metadata/…` — index lifecycle states, uniqueness violation
//!   tombstones, and the schema version

use lodestone_core::{RecordType, Subspace, Value};

/// Region names directly under the root prefix.
mod region {
    pub const ITEMS: &str = "items";
    pub const BLOBS: &str = "blobs";
    pub const INDEXES: &str = "indexes";
    pub const METADATA: &str = "_metadata";
}

/// Keys under `_metadata`.
mod meta {
    pub const INDEX_STATE: &str = "index-state";
    pub const VIOLATIONS: &str = "violations";
    pub const SCHEMA_VERSION: &str = "schema-version";
}

#[derive(Debug, Clone)]
pub struct StoreLayout {
    items: Subspace,
    blobs: Subspace,
    indexes: Subspace,
    metadata: Subspace,
}

impl StoreLayout {
    pub fn new(root: Subspace) -> Self {
        Self {
            items: root.subspace(&[Value::from(region::ITEMS)]),
            blobs: root.subspace(&[Value::from(region::BLOBS)]),
            indexes: root.subspace(&[Value::from(region::INDEXES)]),
            metadata: root.subspace(&[Value::from(region::METADATA)]),
        }
    }

    /// The region holding every record of one type.
    pub fn items_of(&self, record_type: RecordType) -> Subspace {
        self.items.subspace(&[Value::from(record_type)])
    }

    pub fn item_key(&self, record_type: RecordType, primary_key: &[Value]) -> Vec<u8> {
        self.items_of(record_type).pack(primary_key)
    }

    pub fn blobs(&self) -> &Subspace {
        &self.blobs
    }

    /// The region holding one index's payload.
    pub fn index(&self, name: &str) -> Subspace {
        self.indexes.subspace(&[Value::from(name)])
    }

    pub fn index_states(&self) -> Subspace {
        self.metadata.subspace(&[Value::from(meta::INDEX_STATE)])
    }

    pub fn violations(&self) -> Subspace {
        self.metadata.subspace(&[Value::from(meta::VIOLATIONS)])
    }

    pub fn schema_version_key(&self) -> Vec<u8> {
        self.metadata.pack(&[Value::from(meta::SCHEMA_VERSION)])
    }
}

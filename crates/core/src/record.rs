//! The record model: typed entities with statically known fields.
//!
//! Records are opaque byte blobs to the engine; the store only looks inside
//! through the field descriptor table a type declares. That table is the
//! neutral stand-in for compile-time key paths: one entry per field, with a
//! plain function that pulls the field out as a tuple [`Value`].

use serde::{de::DeserializeOwned, Serialize};

use crate::tuple::Value;

/// Stable name identifying a record type in the key space.
pub type RecordType = &'static str;

/// A field path, resolved against the record type's descriptor table.
pub type KeyPath = &'static str;

/// How many values a field contributes to an index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCardinality {
    One,
    /// The extractor returns a [`Value::Tuple`] of elements; single-field
    /// scalar indexes fan out into one entry per element.
    Many,
}

/// One entry of a record type's static field table.
pub struct FieldDescriptor<R> {
    pub name: KeyPath,
    pub cardinality: FieldCardinality,
    pub extract: fn(&R) -> Value,
}

impl<R> FieldDescriptor<R> {
    pub const fn scalar(name: KeyPath, extract: fn(&R) -> Value) -> Self {
        Self {
            name,
            cardinality: FieldCardinality::One,
            extract,
        }
    }

    pub const fn repeated(name: KeyPath, extract: fn(&R) -> Value) -> Self {
        Self {
            name,
            cardinality: FieldCardinality::Many,
            extract,
        }
    }
}

/// A typed, persistable record.
///
/// Implementations are expected to be generated or written once per type:
/// a stable type name, a primary key tuple, the field table, and the static
/// list of index declarations.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const TYPE: RecordType;

    fn primary_key(&self) -> Vec<Value>;

    fn fields() -> &'static [FieldDescriptor<Self>];

    fn indexes() -> Vec<crate::index::IndexDescriptor>;

    /// Extract a field value by path. `None` means the path names no field
    /// of this type, which callers surface as a validation failure.
    fn extract(&self, path: &str) -> Option<Value> {
        Self::fields()
            .iter()
            .find(|field| field.name == path)
            .map(|field| (field.extract)(self))
    }

    fn field_cardinality(path: &str) -> Option<FieldCardinality> {
        Self::fields()
            .iter()
            .find(|field| field.name == path)
            .map(|field| field.cardinality)
    }
}

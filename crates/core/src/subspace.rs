//! Subspaces carve the shared key space into disjoint regions.
//!
//! A subspace is nothing more than an immutable byte prefix plus the tuple
//! packing helpers scoped to it. Every region of the store (items, blobs,
//! indexes, metadata) is addressed through one.

use thiserror::Error;

use crate::tuple::{self, TupleError, Value};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubspaceError {
    #[error("key does not start with the subspace prefix")]
    PrefixMismatch,

    #[error(transparent)]
    Tuple(#[from] TupleError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subspace {
    prefix: Vec<u8>,
}

impl Subspace {
    pub fn new(prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// A subspace rooted at the packed form of a tuple.
    pub fn from_tuple(values: &[Value]) -> Self {
        Self {
            prefix: tuple::pack(values),
        }
    }

    pub fn raw_prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// A child subspace whose prefix is this prefix plus the packed tail.
    pub fn subspace(&self, tail: &[Value]) -> Subspace {
        Subspace {
            prefix: self.pack(tail),
        }
    }

    /// Pack a tuple under this prefix.
    pub fn pack(&self, values: &[Value]) -> Vec<u8> {
        let packed = tuple::pack(values);
        let mut key = Vec::with_capacity(self.prefix.len() + packed.len());
        key.extend_from_slice(&self.prefix);
        key.extend_from_slice(&packed);
        key
    }

    /// Recover the tuple a key encodes under this prefix.
    pub fn unpack(&self, key: &[u8]) -> Result<Vec<Value>, SubspaceError> {
        let tail = key
            .strip_prefix(self.prefix.as_slice())
            .ok_or(SubspaceError::PrefixMismatch)?;
        Ok(tuple::unpack(tail)?)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        key.starts_with(&self.prefix)
    }

    /// The half-open key range `[first, last)` covering exactly the keys
    /// under this prefix. `last` is the prefix followed by `0xFF`, which no
    /// packed tuple starts with.
    pub fn range(&self) -> (Vec<u8>, Vec<u8>) {
        let first = self.prefix.clone();
        let mut last = self.prefix.clone();
        last.push(0xFF);
        (first, last)
    }
}

impl std::fmt::Display for Subspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(&self.prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> Subspace {
        Subspace::from_tuple(&[Value::Text("test-root".into())])
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        let space = space();
        let key = space.pack(&[Value::Text("users".into()), Value::Int(42)]);
        let values = space.unpack(&key).unwrap();
        assert_eq!(
            values,
            vec![Value::Text("users".into()), Value::Int(42)]
        );
    }

    #[test]
    fn test_unpack_rejects_foreign_prefix() {
        let space = space();
        let other = Subspace::from_tuple(&[Value::Text("other-root".into())]);
        let key = other.pack(&[Value::Int(1)]);
        assert_eq!(space.unpack(&key), Err(SubspaceError::PrefixMismatch));
    }

    #[test]
    fn test_range_covers_children_only() {
        let space = space();
        let (first, last) = space.range();

        let inside = space.pack(&[Value::Int(7)]);
        assert!(first <= inside && inside < last);

        let sibling = Subspace::from_tuple(&[Value::Text("test-roou".into())]);
        let outside = sibling.pack(&[Value::Int(7)]);
        assert!(!(first <= outside && outside < last));
    }

    #[test]
    fn test_nested_subspace_stays_in_parent_range() {
        let space = space();
        let child = space.subspace(&[Value::Text("child".into())]);
        let (first, last) = space.range();
        let key = child.pack(&[Value::Int(1)]);
        assert!(first <= key && key < last);
        assert!(space.contains(key.as_slice()));
    }
}

//! Uniqueness violation tracking.
//!
//! While an index is write-only, a conflicting write is not an error: the
//! conflict is recorded as a tombstone under
//! `_metadata/violations/<index>/<value>/<existing-pk>/<new-pk>` and the
//! write proceeds. Resolution happens later, as part of the index build
//! workflow, by listing and clearing these entries.

use lodestone_core::kv::{KvTransaction, RangeScan, StreamingMode};
use lodestone_core::{tuple, StoreError, Subspace, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub index: String,
    /// The contested index value tuple.
    pub value: Vec<Value>,
    /// Packed primary key already holding the value.
    pub existing: Vec<u8>,
    /// Packed primary key that collided with it.
    pub incoming: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ViolationTracker {
    space: Subspace,
}

impl ViolationTracker {
    pub fn new(space: Subspace) -> Self {
        Self { space }
    }

    fn key(&self, index: &str, value: &[Value], existing: &[u8], incoming: &[u8]) -> Vec<u8> {
        self.space.pack(&[
            Value::from(index),
            Value::Bytes(tuple::pack(value)),
            Value::Bytes(existing.to_vec()),
            Value::Bytes(incoming.to_vec()),
        ])
    }

    pub fn record<Tx: KvTransaction>(
        &self,
        tx: &mut Tx,
        index: &str,
        value: &[Value],
        existing: &[u8],
        incoming: &[u8],
    ) {
        tracing::debug!(index, "tracked uniqueness conflict");
        tx.set(&self.key(index, value, existing, incoming), &[]);
    }

    /// Tracked conflicts for one index, oldest key order.
    pub fn list<Tx: KvTransaction>(
        &self,
        tx: &mut Tx,
        index: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Violation>, StoreError> {
        let (begin, end) = self.space.subspace(&[Value::from(index)]).range();
        let mut scan = RangeScan::new(begin, end).mode(StreamingMode::WantAll);
        if let Some(limit) = limit {
            scan = scan.limit(limit);
        }

        let mut violations = Vec::new();
        for (key, _) in tx.get_range(scan)? {
            violations.push(self.decode(&key)?);
        }
        Ok(violations)
    }

    pub fn clear<Tx: KvTransaction>(&self, tx: &mut Tx, violation: &Violation) {
        let key = self.key(
            &violation.index,
            &violation.value,
            &violation.existing,
            &violation.incoming,
        );
        tx.clear(&key);
    }

    pub fn clear_index<Tx: KvTransaction>(&self, tx: &mut Tx, index: &str) {
        let (begin, end) = self.space.subspace(&[Value::from(index)]).range();
        tx.clear_range(&begin, &end);
    }

    fn decode(&self, key: &[u8]) -> Result<Violation, StoreError> {
        let values = self.space.unpack(key)?;
        match values.as_slice() {
            [Value::Text(index), Value::Bytes(value), Value::Bytes(existing), Value::Bytes(incoming)] => {
                Ok(Violation {
                    index: index.clone(),
                    value: tuple::unpack(value)?,
                    existing: existing.clone(),
                    incoming: incoming.clone(),
                })
            }
            _ => Err(StoreError::decode("malformed violation key")),
        }
    }
}

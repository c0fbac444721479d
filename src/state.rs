//! Index lifecycle state persistence.
//!
//! States live under `_metadata/index-state/<index-name>` as a single byte.
//! The write path fetches the states for all of a type's descriptors with
//! one range read; an index with no persisted entry is in its descriptor's
//! declared initial state. State is never cached across transactions, so
//! writers always observe ongoing index builds.

use std::collections::HashMap;

use tracing::info;

use lodestone_core::kv::{KvTransaction, RangeScan, StreamingMode};
use lodestone_core::{IndexDescriptor, IndexState, StoreError, Subspace, Value};

#[derive(Debug, Clone)]
pub struct IndexStateManager {
    space: Subspace,
}

impl IndexStateManager {
    pub fn new(space: Subspace) -> Self {
        Self { space }
    }

    fn key(&self, index: &str) -> Vec<u8> {
        self.space.pack(&[Value::from(index)])
    }

    /// The persisted state for one index, if any.
    pub fn read<Tx: KvTransaction>(
        &self,
        tx: &mut Tx,
        index: &str,
    ) -> Result<Option<IndexState>, StoreError> {
        match tx.get(&self.key(index))? {
            Some(raw) => Ok(Some(decode_state(index, &raw)?)),
            None => Ok(None),
        }
    }

    /// The effective state for one index: persisted, or the descriptor's
    /// initial state.
    pub fn effective<Tx: KvTransaction>(
        &self,
        tx: &mut Tx,
        descriptor: &IndexDescriptor,
    ) -> Result<IndexState, StoreError> {
        Ok(self
            .read(tx, &descriptor.name)?
            .unwrap_or(descriptor.initial_state))
    }

    /// Effective states for a whole descriptor set, fetched with one range
    /// read over the state region.
    pub fn effective_all<Tx: KvTransaction>(
        &self,
        tx: &mut Tx,
        descriptors: &[IndexDescriptor],
    ) -> Result<HashMap<String, IndexState>, StoreError> {
        let (begin, end) = self.space.range();
        let persisted = tx.get_range(RangeScan::new(begin, end).mode(StreamingMode::WantAll))?;

        let mut by_name = HashMap::with_capacity(persisted.len());
        for (key, raw) in persisted {
            let mut values = self.space.unpack(&key)?;
            let name = match values.pop() {
                Some(Value::Text(name)) if values.is_empty() => name,
                _ => return Err(StoreError::decode("malformed index state key")),
            };
            let state = decode_state(&name, &raw)?;
            by_name.insert(name, state);
        }

        let mut states = HashMap::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let state = by_name
                .get(&descriptor.name)
                .copied()
                .unwrap_or(descriptor.initial_state);
            states.insert(descriptor.name.clone(), state);
        }
        Ok(states)
    }

    pub fn set<Tx: KvTransaction>(&self, tx: &mut Tx, index: &str, state: IndexState) {
        info!(index, %state, "index state transition");
        tx.set(&self.key(index), &[state.to_byte()]);
    }
}

fn decode_state(index: &str, raw: &[u8]) -> Result<IndexState, StoreError> {
    raw.first()
        .copied()
        .and_then(IndexState::from_byte)
        .ok_or_else(|| StoreError::decode(format!("malformed state for index {index}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestone_core::kv::{KvEngine, TransactionConfig};
    use lodestone_core::IndexKind;
    use lodestone_memkv::MemKv;

    fn manager() -> IndexStateManager {
        IndexStateManager::new(Subspace::from_tuple(&[Value::from("states-test")]))
    }

    fn descriptor(name: &str, initial: IndexState) -> IndexDescriptor {
        IndexDescriptor::new(name, IndexKind::Scalar, vec!["field"]).with_initial_state(initial)
    }

    #[test]
    fn test_missing_state_uses_descriptor_default() {
        let engine = MemKv::new();
        let manager = manager();
        let descriptors = vec![
            descriptor("a", IndexState::Readable),
            descriptor("b", IndexState::Disabled),
        ];

        let states: HashMap<String, IndexState> = engine
            .with_transaction(&TransactionConfig::default(), |tx| {
                manager.effective_all(tx, &descriptors)
            })
            .unwrap();

        assert_eq!(states["a"], IndexState::Readable);
        assert_eq!(states["b"], IndexState::Disabled);
    }

    #[test]
    fn test_persisted_state_overrides_default() {
        let engine = MemKv::new();
        let manager = manager();
        let descriptors = vec![descriptor("a", IndexState::Readable)];

        engine
            .with_transaction::<_, StoreError, _>(&TransactionConfig::default(), |tx| {
                manager.set(tx, "a", IndexState::WriteOnly);
                Ok(())
            })
            .unwrap();

        let state = engine
            .with_transaction::<_, StoreError, _>(&TransactionConfig::default(), |tx| {
                manager.effective(tx, &descriptors[0])
            })
            .unwrap();
        assert_eq!(state, IndexState::WriteOnly);
    }
}

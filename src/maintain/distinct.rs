//! Distinct-approximation maintenance.
//!
//! Each group keeps one HyperLogLog register blob under
//! `indexes/<n>/<group…>/HLL`. The sketch is add-only: inserts and updates
//! observe the new value, deletes leave the registers untouched, so the
//! estimate never shrinks.

use lodestone_core::kv::KvTransaction;
use lodestone_core::{tuple, Record, StoreError, Subspace, Value};

use super::{extract_path, extract_tuple, MaintainContext};
use crate::hll::HyperLogLog;

const REGISTER_KEY: &str = "HLL";

fn register_key(space: &Subspace, group: &[Value]) -> Vec<u8> {
    let mut elements = Vec::with_capacity(group.len() + 1);
    elements.extend(group.iter().cloned());
    elements.push(Value::from(REGISTER_KEY));
    space.pack(&elements)
}

pub fn update<R: Record, Tx: KvTransaction>(
    ctx: &MaintainContext<'_>,
    tx: &mut Tx,
    new: Option<&R>,
    precision: u8,
) -> Result<(), StoreError> {
    let record = match new {
        Some(record) => record,
        None => return Ok(()),
    };

    let group = extract_tuple(record, ctx.descriptor.group_paths())?;
    let value_path = ctx
        .descriptor
        .value_path()
        .ok_or_else(|| StoreError::validation("distinct index declares no value path"))?;
    let value = extract_path(record, value_path)?;

    let key = register_key(&ctx.space, &group);
    let mut sketch = match tx.get(&key)? {
        Some(raw) => HyperLogLog::from_bytes(&raw)?,
        None => HyperLogLog::new(precision),
    };
    sketch.insert(&tuple::pack(std::slice::from_ref(&value)));
    tx.set(&key, &sketch.to_bytes());
    Ok(())
}

/// The approximate number of distinct values observed for a group.
pub fn read_estimate<Tx: KvTransaction>(
    space: &Subspace,
    tx: &mut Tx,
    group: &[Value],
) -> Result<u64, StoreError> {
    match tx.get(&register_key(space, group))? {
        Some(raw) => Ok(HyperLogLog::from_bytes(&raw)?.estimate()),
        None => Ok(0),
    }
}

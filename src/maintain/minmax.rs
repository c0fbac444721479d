//! Min/max maintenance over two layers.
//!
//! The sorted layer `S/<group>/<value>/<pk…>` keeps every contributing
//! value in key order; the aggregate layer `A/<group>` holds the packed
//! current extremum. Deleting the extremum rediscovers the next one from
//! the sorted layer head; when a group empties, its aggregate row is
//! cleared so neither layer mentions the group.

use lodestone_core::kv::{KvTransaction, RangeScan};
use lodestone_core::{tuple, Record, StoreError, Subspace, Value};

use super::{extract_path, extract_tuple, same_tuple, MaintainContext};

mod layer {
    pub const AGGREGATE: &str = "A";
    pub const SORTED: &str = "S";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extremum {
    Min,
    Max,
}

struct Entry {
    group: Vec<Value>,
    value: Value,
    pk: Vec<Value>,
}

fn entry<R: Record>(
    ctx: &MaintainContext<'_>,
    record: &R,
) -> Result<Entry, StoreError> {
    let group = extract_tuple(record, ctx.descriptor.group_paths())?;
    let value_path = ctx
        .descriptor
        .value_path()
        .ok_or_else(|| StoreError::validation("min/max index declares no value path"))?;
    Ok(Entry {
        group,
        value: extract_path(record, value_path)?,
        pk: record.primary_key(),
    })
}

fn sorted_key(space: &Subspace, entry: &Entry) -> Vec<u8> {
    let mut elements = Vec::with_capacity(2 + entry.group.len() + entry.pk.len());
    elements.push(Value::from(layer::SORTED));
    elements.extend(entry.group.iter().cloned());
    elements.push(entry.value.clone());
    elements.extend(entry.pk.iter().cloned());
    space.pack(&elements)
}

fn group_sorted_space(space: &Subspace, group: &[Value]) -> Subspace {
    let mut elements = Vec::with_capacity(1 + group.len());
    elements.push(Value::from(layer::SORTED));
    elements.extend(group.iter().cloned());
    space.subspace(&elements)
}

fn aggregate_key(space: &Subspace, group: &[Value]) -> Vec<u8> {
    let mut elements = Vec::with_capacity(1 + group.len());
    elements.push(Value::from(layer::AGGREGATE));
    elements.extend(group.iter().cloned());
    space.pack(&elements)
}

pub fn update<R: Record, Tx: KvTransaction>(
    ctx: &MaintainContext<'_>,
    tx: &mut Tx,
    old: Option<&R>,
    new: Option<&R>,
    extremum: Extremum,
) -> Result<(), StoreError> {
    let old_entry = old.map(|record| entry(ctx, record)).transpose()?;
    let new_entry = new.map(|record| entry(ctx, record)).transpose()?;

    if let Some(entry) = &old_entry {
        tx.clear(&sorted_key(&ctx.space, entry));
    }
    if let Some(entry) = &new_entry {
        tx.set(&sorted_key(&ctx.space, entry), &[]);
    }

    // refresh the aggregate row of every touched group
    if let Some(entry) = &old_entry {
        refresh_aggregate(&ctx.space, tx, &entry.group, extremum)?;
    }
    if let Some(entry) = &new_entry {
        let already_done = old_entry
            .as_ref()
            .is_some_and(|old| same_tuple(&old.group, &entry.group));
        if !already_done {
            refresh_aggregate(&ctx.space, tx, &entry.group, extremum)?;
        }
    }
    Ok(())
}

/// Re-derive `A/<group>` from the sorted layer head (or tail, for max).
fn refresh_aggregate<Tx: KvTransaction>(
    space: &Subspace,
    tx: &mut Tx,
    group: &[Value],
    extremum: Extremum,
) -> Result<(), StoreError> {
    let sorted = group_sorted_space(space, group);
    let (begin, end) = sorted.range();
    let mut scan = RangeScan::new(begin, end).limit(1);
    if extremum == Extremum::Max {
        scan = scan.reverse();
    }

    let head = tx.get_range(scan)?;
    let key = aggregate_key(space, group);
    match head.first() {
        Some((entry_key, _)) => {
            let suffix = entry_key
                .strip_prefix(sorted.raw_prefix())
                .expect("scanned key is under its own range");
            let mut values = tuple::unpack(suffix)?;
            if values.is_empty() {
                return Err(StoreError::decode("malformed sorted-layer key"));
            }
            // first element past the group is the indexed value
            let value = values.remove(0);
            tx.set(&key, &tuple::pack(std::slice::from_ref(&value)));
        }
        None => tx.clear(&key),
    }
    Ok(())
}

/// The current extremum for a group; fails when the group is empty.
pub fn read_extremum<Tx: KvTransaction>(
    space: &Subspace,
    index: &str,
    tx: &mut Tx,
    group: &[Value],
) -> Result<Value, StoreError> {
    match tx.get(&aggregate_key(space, group))? {
        Some(raw) => {
            let mut values = tuple::unpack(&raw)?;
            match values.pop() {
                Some(value) if values.is_empty() => Ok(value),
                _ => Err(StoreError::decode("malformed extremum value")),
            }
        }
        None => Err(StoreError::EmptyGroup {
            index: index.to_string(),
        }),
    }
}

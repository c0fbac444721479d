//! Count, sum and average maintenance.
//!
//! Counters are 8-byte little-endian integers updated through the engine's
//! atomic add, so concurrent writers never conflict on them. Sums store the
//! little-endian bit pattern of an `f64` and go through read-modify-write;
//! correctness under concurrency comes from optimistic retry re-reading the
//! current value. Averages are a sum layer and a count layer under the same
//! group and are divided on read.

use lodestone_core::kv::KvTransaction;
use lodestone_core::{Record, StoreError, Subspace, Value};

use super::{extract_path, extract_tuple, numeric, same_tuple, MaintainContext};

/// Layer markers for indexes that keep more than one row family.
pub(crate) mod layer {
    pub const SUM: &str = "S";
    pub const COUNT: &str = "C";
}

pub fn update_count<R: Record, Tx: KvTransaction>(
    ctx: &MaintainContext<'_>,
    tx: &mut Tx,
    old: Option<&R>,
    new: Option<&R>,
) -> Result<(), StoreError> {
    // every key path is part of the group; a count has no value field
    let old_group = old
        .map(|record| extract_tuple(record, &ctx.descriptor.key_paths))
        .transpose()?;
    let new_group = new
        .map(|record| extract_tuple(record, &ctx.descriptor.key_paths))
        .transpose()?;

    if let (Some(a), Some(b)) = (&old_group, &new_group) {
        if same_tuple(a, b) {
            return Ok(());
        }
    }

    if let Some(group) = old_group {
        tx.atomic_add(&ctx.space.pack(&group), -1);
    }
    if let Some(group) = new_group {
        tx.atomic_add(&ctx.space.pack(&group), 1);
    }
    Ok(())
}

pub fn update_sum<R: Record, Tx: KvTransaction>(
    ctx: &MaintainContext<'_>,
    tx: &mut Tx,
    old: Option<&R>,
    new: Option<&R>,
) -> Result<(), StoreError> {
    let old_entry = contribution(ctx, old)?;
    let new_entry = contribution(ctx, new)?;

    match (old_entry, new_entry) {
        (Some((old_group, old_value)), Some((new_group, new_value)))
            if same_tuple(&old_group, &new_group) =>
        {
            let delta = new_value - old_value;
            if delta != 0.0 {
                add_to_sum(tx, &ctx.space.pack(&old_group), delta)?;
            }
        }
        (old_entry, new_entry) => {
            if let Some((group, value)) = old_entry {
                add_to_sum(tx, &ctx.space.pack(&group), -value)?;
            }
            if let Some((group, value)) = new_entry {
                add_to_sum(tx, &ctx.space.pack(&group), value)?;
            }
        }
    }
    Ok(())
}

pub fn update_average<R: Record, Tx: KvTransaction>(
    ctx: &MaintainContext<'_>,
    tx: &mut Tx,
    old: Option<&R>,
    new: Option<&R>,
) -> Result<(), StoreError> {
    let sums = ctx.space.subspace(&[Value::from(layer::SUM)]);
    let counts = ctx.space.subspace(&[Value::from(layer::COUNT)]);

    let old_entry = contribution(ctx, old)?;
    let new_entry = contribution(ctx, new)?;

    match (&old_entry, &new_entry) {
        (Some((old_group, old_value)), Some((new_group, new_value)))
            if same_tuple(old_group, new_group) =>
        {
            let delta = new_value - old_value;
            if delta != 0.0 {
                add_to_sum(tx, &sums.pack(old_group), delta)?;
            }
        }
        _ => {
            if let Some((group, value)) = &old_entry {
                add_to_sum(tx, &sums.pack(group), -value)?;
                tx.atomic_add(&counts.pack(group), -1);
            }
            if let Some((group, value)) = &new_entry {
                add_to_sum(tx, &sums.pack(group), *value)?;
                tx.atomic_add(&counts.pack(group), 1);
            }
        }
    }
    Ok(())
}

fn contribution<R: Record>(
    ctx: &MaintainContext<'_>,
    record: Option<&R>,
) -> Result<Option<(Vec<Value>, f64)>, StoreError> {
    let record = match record {
        Some(record) => record,
        None => return Ok(None),
    };
    let group = extract_tuple(record, ctx.descriptor.group_paths())?;
    let value_path = ctx
        .descriptor
        .value_path()
        .ok_or_else(|| StoreError::validation("aggregate index declares no value path"))?;
    let value = numeric(&extract_path(record, value_path)?)?;
    Ok(Some((group, value)))
}

/// Read-modify-write on an f64 stored as little-endian bits.
fn add_to_sum<Tx: KvTransaction>(tx: &mut Tx, key: &[u8], delta: f64) -> Result<(), StoreError> {
    let current = read_f64(tx, key)?;
    let next = current + delta;
    tx.set(key, &next.to_bits().to_le_bytes());
    Ok(())
}

fn read_f64<Tx: KvTransaction>(tx: &mut Tx, key: &[u8]) -> Result<f64, StoreError> {
    match tx.get(key)? {
        Some(raw) => {
            let bits: [u8; 8] = raw
                .as_slice()
                .try_into()
                .map_err(|_| StoreError::decode("sum value is not 8 bytes"))?;
            Ok(f64::from_bits(u64::from_le_bytes(bits)))
        }
        None => Ok(0.0),
    }
}

fn read_i64<Tx: KvTransaction>(tx: &mut Tx, key: &[u8]) -> Result<i64, StoreError> {
    match tx.get(key)? {
        Some(raw) => {
            let bytes: [u8; 8] = raw
                .as_slice()
                .try_into()
                .map_err(|_| StoreError::decode("counter value is not 8 bytes"))?;
            Ok(i64::from_le_bytes(bytes))
        }
        None => Ok(0),
    }
}

/// Current counter for one group of a count index.
pub fn read_count<Tx: KvTransaction>(
    space: &Subspace,
    tx: &mut Tx,
    group: &[Value],
) -> Result<i64, StoreError> {
    read_i64(tx, &space.pack(group))
}

/// Current sum for one group of a sum index.
pub fn read_sum<Tx: KvTransaction>(
    space: &Subspace,
    tx: &mut Tx,
    group: &[Value],
) -> Result<f64, StoreError> {
    read_f64(tx, &space.pack(group))
}

/// Current average for one group of an average index; the empty group has
/// no average.
pub fn read_average<Tx: KvTransaction>(
    space: &Subspace,
    index: &str,
    tx: &mut Tx,
    group: &[Value],
) -> Result<f64, StoreError> {
    let sums = space.subspace(&[Value::from(layer::SUM)]);
    let counts = space.subspace(&[Value::from(layer::COUNT)]);

    let count = read_i64(tx, &counts.pack(group))?;
    if count <= 0 {
        return Err(StoreError::EmptyGroup {
            index: index.to_string(),
        });
    }
    let sum = read_f64(tx, &sums.pack(group))?;
    Ok(sum / count as f64)
}

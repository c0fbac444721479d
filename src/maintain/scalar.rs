//! Scalar and bitmap index maintenance.
//!
//! Both kinds store one empty-valued entry per record under
//! `indexes/<n>/<value…>/<pk…>`. Scalar indexes additionally fan out
//! multi-valued single-path fields (one entry per element) and enforce
//! uniqueness; bitmap indexes are the same shape used for presence tests.

use std::collections::BTreeSet;

use lodestone_core::kv::{KvTransaction, RangeScan};
use lodestone_core::{tuple, FieldCardinality, Record, StoreError, Value};

use super::{extract_tuple, packed_pk, MaintainContext};

/// The value tuples one record contributes to the index.
fn value_tuples<R: Record>(
    ctx: &MaintainContext<'_>,
    record: &R,
    fan_out: bool,
) -> Result<Vec<Vec<Value>>, StoreError> {
    let paths = &ctx.descriptor.key_paths;
    let values = extract_tuple(record, paths)?;

    if fan_out && paths.len() == 1 {
        if let (Some(FieldCardinality::Many), Value::Tuple(elements)) =
            (R::field_cardinality(paths[0]), &values[0])
        {
            return Ok(elements.iter().map(|element| vec![element.clone()]).collect());
        }
    }
    Ok(vec![values])
}

fn entry_keys<R: Record>(
    ctx: &MaintainContext<'_>,
    record: &R,
    fan_out: bool,
) -> Result<BTreeSet<Vec<u8>>, StoreError> {
    let pk = record.primary_key();
    let mut keys = BTreeSet::new();
    for values in value_tuples(ctx, record, fan_out)? {
        let mut elements = values;
        elements.extend(pk.iter().cloned());
        keys.insert(ctx.space.pack(&elements));
    }
    Ok(keys)
}

pub fn update_scalar<R: Record, Tx: KvTransaction>(
    ctx: &MaintainContext<'_>,
    tx: &mut Tx,
    old: Option<&R>,
    new: Option<&R>,
) -> Result<(), StoreError> {
    if ctx.descriptor.unique {
        if let Some(record) = new {
            check_unique(ctx, tx, record)?;
        }
    }
    apply_diff(ctx, tx, old, new, true)
}

pub fn update_bitmap<R: Record, Tx: KvTransaction>(
    ctx: &MaintainContext<'_>,
    tx: &mut Tx,
    old: Option<&R>,
    new: Option<&R>,
) -> Result<(), StoreError> {
    apply_diff(ctx, tx, old, new, false)
}

fn apply_diff<R: Record, Tx: KvTransaction>(
    ctx: &MaintainContext<'_>,
    tx: &mut Tx,
    old: Option<&R>,
    new: Option<&R>,
    fan_out: bool,
) -> Result<(), StoreError> {
    let old_keys = match old {
        Some(record) => entry_keys(ctx, record, fan_out)?,
        None => BTreeSet::new(),
    };
    let new_keys = match new {
        Some(record) => entry_keys(ctx, record, fan_out)?,
        None => BTreeSet::new(),
    };

    for key in old_keys.difference(&new_keys) {
        tx.clear(key);
    }
    for key in new_keys.difference(&old_keys) {
        tx.set(key, &[]);
    }
    Ok(())
}

/// Scan for another primary key already holding one of the record's values.
///
/// In `readable` state a hit is fatal; in `writeOnly` it is tracked and the
/// write proceeds, to be resolved as part of the index build.
fn check_unique<R: Record, Tx: KvTransaction>(
    ctx: &MaintainContext<'_>,
    tx: &mut Tx,
    record: &R,
) -> Result<(), StoreError> {
    let incoming = packed_pk(record)?;

    for values in value_tuples(ctx, record, true)? {
        let value_space = ctx.space.subspace(&values);
        let (begin, end) = value_space.range();
        let entries = tx.get_range(RangeScan::new(begin, end).limit(2))?;

        for (key, _) in entries {
            let existing = key
                .strip_prefix(value_space.raw_prefix())
                .expect("scanned key is under its own range")
                .to_vec();
            if existing == incoming {
                continue;
            }

            if ctx.state.is_readable() {
                return Err(StoreError::UniquenessViolation {
                    index: ctx.descriptor.name.clone(),
                    value: values,
                    existing,
                    incoming,
                });
            }
            // write-only: track and keep going
            ctx.violations
                .record(tx, &ctx.descriptor.name, &values, &existing, &incoming);
        }
    }
    Ok(())
}

/// Primary keys currently indexed under one exact value tuple.
pub fn scan_value<Tx: KvTransaction>(
    space: &lodestone_core::Subspace,
    tx: &mut Tx,
    values: &[Value],
    limit: Option<usize>,
) -> Result<Vec<Vec<Value>>, StoreError> {
    let value_space = space.subspace(values);
    let (begin, end) = value_space.range();
    let mut scan = RangeScan::new(begin, end);
    if let Some(limit) = limit {
        scan = scan.limit(limit);
    }

    let mut pks = Vec::new();
    for (key, _) in tx.get_range(scan)? {
        let suffix = key
            .strip_prefix(value_space.raw_prefix())
            .expect("scanned key is under its own range");
        pks.push(tuple::unpack(suffix)?);
    }
    Ok(pks)
}

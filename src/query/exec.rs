//! Query execution.
//!
//! The chosen plan produces a stream of primary keys (index path) or record
//! blobs (full scan); records are then materialized, filtered by whatever
//! conjuncts the index did not cover, sorted, and cut down by offset and
//! limit. The scan limit is pushed into the KV engine only when nothing
//! in-memory could change which rows survive.

use std::cmp::Ordering;

use itertools::Itertools;

use lodestone_core::kv::{KvTransaction, RangeScan, StreamingMode};
use lodestone_core::{tuple, Record, StoreError, Subspace};

use crate::codec::decode_record;
use crate::items::ItemStore;
use crate::layout::StoreLayout;
use crate::state::IndexStateManager;

use super::plan::{self, Bound, Plan};
use super::{compare_values, Predicate, Query, SortDescriptor};

/// Assumed average row size for O(1) count estimates.
pub const ASSUMED_AVERAGE_ROW_BYTES: i64 = 128;

pub(crate) struct ExecContext<'a> {
    pub layout: &'a StoreLayout,
    pub items: &'a ItemStore,
    pub states: &'a IndexStateManager,
}

pub(crate) fn fetch<R: Record, Tx: KvTransaction>(
    ctx: &ExecContext<'_>,
    tx: &mut Tx,
    query: &Query<R>,
) -> Result<Vec<R>, StoreError> {
    let descriptors = R::indexes();
    let states = ctx.states.effective_all(tx, &descriptors)?;
    let plan = plan::choose::<R>(&query.predicate, &descriptors, &states);

    // a pushed limit must not cut rows the in-memory pipeline still needs
    let pushed_limit = if plan.residual().is_empty() && query.sorts.is_empty() {
        query.limit.map(|limit| limit + query.offset)
    } else {
        None
    };

    let mut records = match &plan {
        Plan::FullScan { residual } => {
            let (begin, end) = ctx.layout.items_of(R::TYPE).range();
            let items = ctx.items.scan(tx, &begin, &end, pushed_limit)?;
            let mut records = Vec::with_capacity(items.len());
            for (_, blob) in items {
                records.push(decode_record::<R>(&blob)?);
            }
            filter(records, residual)?
        }
        Plan::IndexEq { index, values, residual } => {
            let value_space = ctx.layout.index(&index.name).subspace(values);
            let (begin, end) = value_space.range();
            // entries under a partially matched compound prefix still carry
            // the unmatched value elements before the pk
            let unmatched = index.key_paths.len() - values.len();
            let pks = scan_pks(tx, &value_space, begin, end, unmatched, pushed_limit)?;
            filter(fetch_by_pks(ctx, tx, R::TYPE, &pks)?, residual)?
        }
        Plan::IndexRange { index, lower, upper, residual } => {
            let space = ctx.layout.index(&index.name);
            let (begin, end) = range_bounds(&space, lower.as_ref(), upper.as_ref());
            let pks = scan_range_pks(tx, &space, begin, end, pushed_limit)?;
            filter(fetch_by_pks(ctx, tx, R::TYPE, &pks)?, residual)?
        }
    };

    sort_records(&mut records, &query.sorts)?;

    let records = records
        .into_iter()
        .skip(query.offset)
        .take(query.limit.unwrap_or(usize::MAX))
        .collect();
    Ok(records)
}

pub(crate) fn count<R: Record, Tx: KvTransaction>(
    ctx: &ExecContext<'_>,
    tx: &mut Tx,
    query: &Query<R>,
) -> Result<usize, StoreError> {
    let descriptors = R::indexes();
    let states = ctx.states.effective_all(tx, &descriptors)?;
    let plan = plan::choose::<R>(&query.predicate, &descriptors, &states);

    match &plan {
        Plan::FullScan { residual } if residual.is_empty() => {
            let (begin, end) = ctx.layout.items_of(R::TYPE).range();
            let entries =
                tx.get_range(RangeScan::new(begin, end).mode(StreamingMode::WantAll))?;
            Ok(entries.len())
        }
        Plan::IndexEq { index, values, residual } if residual.is_empty() => {
            let value_space = ctx.layout.index(&index.name).subspace(values);
            let (begin, end) = value_space.range();
            let entries =
                tx.get_range(RangeScan::new(begin, end).mode(StreamingMode::WantAll))?;
            Ok(entries.len())
        }
        Plan::IndexRange { index, lower, upper, residual } if residual.is_empty() => {
            let space = ctx.layout.index(&index.name);
            let (begin, end) = range_bounds(&space, lower.as_ref(), upper.as_ref());
            let entries =
                tx.get_range(RangeScan::new(begin, end).mode(StreamingMode::WantAll))?;
            Ok(entries.len())
        }
        _ => {
            let unbounded = Query::<R>::filter(query.predicate.clone());
            Ok(fetch(ctx, tx, &unbounded)?.len())
        }
    }
}

/// Concrete byte bounds for a single-field index range plan.
pub(crate) fn range_bounds(
    space: &Subspace,
    lower: Option<&Bound>,
    upper: Option<&Bound>,
) -> (Vec<u8>, Vec<u8>) {
    let begin = match lower {
        Some(bound) => {
            let value_space = space.subspace(std::slice::from_ref(&bound.value));
            if bound.inclusive {
                value_space.range().0
            } else {
                value_space.range().1
            }
        }
        None => space.range().0,
    };
    let end = match upper {
        Some(bound) => {
            let value_space = space.subspace(std::slice::from_ref(&bound.value));
            if bound.inclusive {
                value_space.range().1
            } else {
                value_space.range().0
            }
        }
        None => space.range().1,
    };
    (begin, end)
}

/// Scan an exact-value subspace. The suffix of every key decodes to the
/// packed pk, preceded by `skip` index value elements when the match
/// covered only a prefix of the index's key paths.
fn scan_pks<Tx: KvTransaction>(
    tx: &mut Tx,
    value_space: &Subspace,
    begin: Vec<u8>,
    end: Vec<u8>,
    skip: usize,
    limit: Option<usize>,
) -> Result<Vec<Vec<u8>>, StoreError> {
    let mut scan = RangeScan::new(begin, end);
    if let Some(limit) = limit {
        scan = scan.limit(limit);
    }

    let mut pks = Vec::new();
    for (key, _) in tx.get_range(scan)? {
        let mut values = value_space.unpack(&key)?;
        if values.len() <= skip {
            return Err(StoreError::decode("malformed index entry"));
        }
        pks.push(tuple::pack(&values.split_off(skip)));
    }
    Ok(pks.into_iter().unique().collect())
}

/// Scan a value range of a single-field index: keys decode to
/// `[value, pk…]`; the pk is everything past the first element.
pub(crate) fn scan_range_pks<Tx: KvTransaction>(
    tx: &mut Tx,
    space: &Subspace,
    begin: Vec<u8>,
    end: Vec<u8>,
    limit: Option<usize>,
) -> Result<Vec<Vec<u8>>, StoreError> {
    let mut scan = RangeScan::new(begin, end);
    if let Some(limit) = limit {
        scan = scan.limit(limit);
    }

    let mut pks = Vec::new();
    for (key, _) in tx.get_range(scan)? {
        let mut values = space.unpack(&key)?;
        if values.is_empty() {
            return Err(StoreError::decode("malformed index entry"));
        }
        pks.push(tuple::pack(&values.split_off(1)));
    }
    Ok(pks.into_iter().unique().collect())
}

fn fetch_by_pks<R: Record, Tx: KvTransaction>(
    ctx: &ExecContext<'_>,
    tx: &mut Tx,
    record_type: &'static str,
    pks: &[Vec<u8>],
) -> Result<Vec<R>, StoreError> {
    let prefix = ctx.layout.items_of(record_type);
    let mut records = Vec::with_capacity(pks.len());
    for pk in pks {
        let mut key = prefix.raw_prefix().to_vec();
        key.extend_from_slice(pk);
        match ctx.items.read(tx, &key)? {
            Some(blob) => records.push(decode_record::<R>(&blob)?),
            None => {
                return Err(StoreError::decode(format!(
                    "index entry references missing {record_type} record 0x{}",
                    hex::encode(pk)
                )))
            }
        }
    }
    Ok(records)
}

fn filter<R: Record>(records: Vec<R>, residual: &[Predicate]) -> Result<Vec<R>, StoreError> {
    if residual.is_empty() {
        return Ok(records);
    }
    let mut kept = Vec::with_capacity(records.len());
    for record in records {
        let mut keep = true;
        for predicate in residual {
            if !predicate.matches(&record)? {
                keep = false;
                break;
            }
        }
        if keep {
            kept.push(record);
        }
    }
    Ok(kept)
}

/// Stable in-memory sort by the declared descriptors, comparing field
/// values in tuple order; type-mismatched pairs compare equal.
fn sort_records<R: Record>(
    records: &mut Vec<R>,
    sorts: &[SortDescriptor],
) -> Result<(), StoreError> {
    if sorts.is_empty() {
        return Ok(());
    }

    let mut decorated = Vec::with_capacity(records.len());
    for record in records.drain(..) {
        let mut keys = Vec::with_capacity(sorts.len());
        for sort in sorts {
            let value = record.extract(sort.path).ok_or_else(|| {
                StoreError::validation(format!("{} has no field named {}", R::TYPE, sort.path))
            })?;
            keys.push(value);
        }
        decorated.push((keys, record));
    }

    decorated.sort_by(|(a, _), (b, _)| {
        for (sort, (x, y)) in sorts.iter().zip(a.iter().zip(b)) {
            let ordering = compare_values(x, y).unwrap_or(Ordering::Equal);
            let ordering = if sort.ascending {
                ordering
            } else {
                ordering.reverse()
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });

    records.extend(decorated.into_iter().map(|(_, record)| record));
    Ok(())
}

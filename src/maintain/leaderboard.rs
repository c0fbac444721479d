//! Time-window leaderboard maintenance.
//!
//! Entries live under `indexes/<n>/<group…>/<window-id>/<-score>/<pk…>`
//! where the window id is the record's timestamp divided by the window
//! width and `-score` is a fixed monotone negation of the score domain:
//! larger scores sort earlier, so a forward range scan with a limit yields
//! the top k straight off the engine. Writers prune group windows that
//! have fallen out of the retained window count.

use std::collections::BTreeSet;

use lodestone_core::kv::{KvTransaction, RangeScan};
use lodestone_core::tuple::{transform_double, untransform_double};
use lodestone_core::{tuple, Record, StoreError, Subspace, Value};

use super::{extract_path, extract_tuple, numeric, MaintainContext};

/// Monotone negation: byte order of the result is the reverse of the
/// numeric order of the input.
pub fn invert_score(score: f64) -> [u8; 8] {
    (!transform_double(score)).to_be_bytes()
}

pub fn revert_score(inverted: &[u8]) -> Result<f64, StoreError> {
    let bits: [u8; 8] = inverted
        .try_into()
        .map_err(|_| StoreError::decode("inverted score is not 8 bytes"))?;
    Ok(untransform_double(!u64::from_be_bytes(bits)))
}

struct Entry {
    group: Vec<Value>,
    window: i64,
    score: f64,
    pk: Vec<Value>,
}

fn entry<R: Record>(
    ctx: &MaintainContext<'_>,
    record: &R,
    window: u64,
    group_by: usize,
) -> Result<Entry, StoreError> {
    let paths = &ctx.descriptor.key_paths;
    if paths.len() != group_by + 2 {
        return Err(StoreError::validation(
            "leaderboard index needs [group…, score, timestamp] key paths",
        ));
    }

    let group = extract_tuple(record, &paths[..group_by])?;
    let score = numeric(&extract_path(record, paths[group_by])?)?;
    let at = match extract_path(record, paths[group_by + 1])? {
        Value::Int(seconds) => seconds,
        other => {
            return Err(StoreError::validation(format!(
                "leaderboard timestamp must be an integer, got {other}"
            )))
        }
    };

    Ok(Entry {
        group,
        window: at.div_euclid(window as i64),
        score,
        pk: record.primary_key(),
    })
}

fn entry_key(space: &Subspace, entry: &Entry) -> Vec<u8> {
    let mut elements = Vec::with_capacity(entry.group.len() + 2 + entry.pk.len());
    elements.extend(entry.group.iter().cloned());
    elements.push(Value::Int(entry.window));
    elements.push(Value::Bytes(invert_score(entry.score).to_vec()));
    elements.extend(entry.pk.iter().cloned());
    space.pack(&elements)
}

pub fn update<R: Record, Tx: KvTransaction>(
    ctx: &MaintainContext<'_>,
    tx: &mut Tx,
    old: Option<&R>,
    new: Option<&R>,
    window: u64,
    window_count: u32,
    group_by: usize,
) -> Result<(), StoreError> {
    let old_entry = old
        .map(|record| entry(ctx, record, window, group_by))
        .transpose()?;
    let new_entry = new
        .map(|record| entry(ctx, record, window, group_by))
        .transpose()?;

    let mut old_keys = BTreeSet::new();
    if let Some(entry) = &old_entry {
        old_keys.insert(entry_key(&ctx.space, entry));
    }
    let mut new_keys = BTreeSet::new();
    if let Some(entry) = &new_entry {
        new_keys.insert(entry_key(&ctx.space, entry));
    }

    for key in old_keys.difference(&new_keys) {
        tx.clear(key);
    }
    for key in new_keys.difference(&old_keys) {
        tx.set(key, &[]);
    }

    // drop group windows that fell out of the retained range
    if let Some(entry) = &new_entry {
        let cutoff = entry.window - (i64::from(window_count) - 1);
        let group_space = ctx.space.subspace(&entry.group);
        let (begin, _) = group_space.range();
        let end = group_space.pack(&[Value::Int(cutoff)]);
        if begin < end {
            tx.clear_range(&begin, &end);
        }
    }
    Ok(())
}

/// One leaderboard row, best first.
#[derive(Debug, Clone, PartialEq)]
pub struct Standing {
    pub score: f64,
    pub pk: Vec<Value>,
}

/// Top `k` entries of one group window, descending by score.
pub fn top_k<Tx: KvTransaction>(
    space: &Subspace,
    tx: &mut Tx,
    group: &[Value],
    window: i64,
    k: usize,
) -> Result<Vec<Standing>, StoreError> {
    let mut elements = group.to_vec();
    elements.push(Value::Int(window));
    let window_space = space.subspace(&elements);
    let (begin, end) = window_space.range();

    let mut standings = Vec::new();
    for (key, _) in tx.get_range(RangeScan::new(begin, end).limit(k))? {
        let suffix = key
            .strip_prefix(window_space.raw_prefix())
            .expect("scanned key is under its own range");
        let mut values = tuple::unpack(suffix)?;
        if values.is_empty() {
            return Err(StoreError::decode("malformed leaderboard key"));
        }
        let inverted = match values.remove(0) {
            Value::Bytes(raw) => raw,
            _ => return Err(StoreError::decode("malformed leaderboard key")),
        };
        standings.push(Standing {
            score: revert_score(&inverted)?,
            pk: values,
        });
    }
    Ok(standings)
}

/// The most recent window currently present for a group.
pub fn latest_window<Tx: KvTransaction>(
    space: &Subspace,
    tx: &mut Tx,
    group: &[Value],
) -> Result<Option<i64>, StoreError> {
    let group_space = space.subspace(group);
    let (begin, end) = group_space.range();
    let tail = tx.get_range(RangeScan::new(begin, end).reverse().limit(1))?;

    match tail.first() {
        Some((key, _)) => {
            let values = group_space.unpack(key)?;
            match values.first() {
                Some(Value::Int(window)) => Ok(Some(*window)),
                _ => Err(StoreError::decode("malformed leaderboard key")),
            }
        }
        None => Ok(None),
    }
}

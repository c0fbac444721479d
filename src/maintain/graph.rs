//! Graph adjacency maintenance.
//!
//! Edges are records with a from-field, a to-field, and an edge label
//! field. The index materializes adjacency rows
//! `indexes/<n>/<node>/<edge>/<neighbor>/<pk…>` so one BFS step is a range
//! scan on `<node>/` (or `<node>/<edge>/` when filtering by label).

use std::collections::BTreeSet;

use lodestone_core::kv::{KvTransaction, RangeScan};
use lodestone_core::{GraphDirection, Record, StoreError, Subspace, Value};

use super::{extract_path, MaintainContext};

fn entry_keys<R: Record>(
    ctx: &MaintainContext<'_>,
    record: &R,
    direction: GraphDirection,
    edge_path: &str,
) -> Result<BTreeSet<Vec<u8>>, StoreError> {
    let paths = &ctx.descriptor.key_paths;
    if paths.len() != 2 {
        return Err(StoreError::validation(
            "graph index needs exactly [from, to] key paths",
        ));
    }
    let from = extract_path(record, paths[0])?;
    let to = extract_path(record, paths[1])?;
    let edge = extract_path(record, edge_path)?;
    let pk = record.primary_key();

    let row = |node: &Value, neighbor: &Value| {
        let mut elements = Vec::with_capacity(3 + pk.len());
        elements.push(node.clone());
        elements.push(edge.clone());
        elements.push(neighbor.clone());
        elements.extend(pk.iter().cloned());
        ctx.space.pack(&elements)
    };

    let mut keys = BTreeSet::new();
    match direction {
        GraphDirection::Outgoing => {
            keys.insert(row(&from, &to));
        }
        GraphDirection::Incoming => {
            keys.insert(row(&to, &from));
        }
        GraphDirection::Undirected => {
            keys.insert(row(&from, &to));
            keys.insert(row(&to, &from));
        }
    }
    Ok(keys)
}

pub fn update<R: Record, Tx: KvTransaction>(
    ctx: &MaintainContext<'_>,
    tx: &mut Tx,
    old: Option<&R>,
    new: Option<&R>,
    direction: GraphDirection,
    edge_path: &str,
) -> Result<(), StoreError> {
    let old_keys = match old {
        Some(record) => entry_keys(ctx, record, direction, edge_path)?,
        None => BTreeSet::new(),
    };
    let new_keys = match new {
        Some(record) => entry_keys(ctx, record, direction, edge_path)?,
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

/// One adjacency row.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub edge: Value,
    pub node: Value,
    pub pk: Vec<Value>,
}

/// One BFS step: every neighbor of `node`, optionally restricted to one
/// edge label.
pub fn neighbors<Tx: KvTransaction>(
    space: &Subspace,
    tx: &mut Tx,
    node: &Value,
    edge: Option<&Value>,
    limit: Option<usize>,
) -> Result<Vec<Neighbor>, StoreError> {
    let mut elements = vec![node.clone()];
    if let Some(edge) = edge {
        elements.push(edge.clone());
    }
    let (begin, end) = space.subspace(&elements).range();
    let mut scan = RangeScan::new(begin, end);
    if let Some(limit) = limit {
        scan = scan.limit(limit);
    }

    let mut rows = Vec::new();
    for (key, _) in tx.get_range(scan)? {
        let mut values = space.unpack(&key)?;
        if values.len() < 3 {
            return Err(StoreError::decode("malformed adjacency key"));
        }
        let pk = values.split_off(3);
        let neighbor = values.pop().expect("length checked above");
        let edge = values.remove(1);
        rows.push(Neighbor {
            edge,
            node: neighbor,
            pk,
        });
    }
    Ok(rows)
}

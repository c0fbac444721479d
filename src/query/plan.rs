//! Query planning: index scan vs full type scan.
//!
//! Only conjuncts under a root AND (or a single leaf) are candidates for
//! index matching; any other structure is evaluated in memory. Selection
//! order: compound index with an equality-covered leading prefix of at
//! least two fields, then single-field equality, then single-field range.
//! An index qualifies only when its effective state is readable and its
//! matched paths are single-valued fields.

use std::collections::HashMap;

use tracing::debug;

use lodestone_core::{
    FieldCardinality, IndexDescriptor, IndexKind, IndexState, Record, Value,
};

use super::{CompareOp, Predicate};

/// One endpoint of a range scan over an index value.
#[derive(Debug, Clone, PartialEq)]
pub struct Bound {
    pub value: Value,
    pub inclusive: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// Scan one value prefix of an index.
    IndexEq {
        index: IndexDescriptor,
        values: Vec<Value>,
        residual: Vec<Predicate>,
    },
    /// Scan a bounded value range of a single-field index.
    IndexRange {
        index: IndexDescriptor,
        lower: Option<Bound>,
        upper: Option<Bound>,
        residual: Vec<Predicate>,
    },
    /// Scan every record of the type and filter in memory.
    FullScan { residual: Vec<Predicate> },
}

impl Plan {
    pub fn residual(&self) -> &[Predicate] {
        match self {
            Plan::IndexEq { residual, .. } => residual,
            Plan::IndexRange { residual, .. } => residual,
            Plan::FullScan { residual } => residual,
        }
    }
}

/// The flattened conjunct list, or `None` when the shape is not a root AND
/// or a single leaf.
fn conjuncts(predicate: &Predicate) -> Option<Vec<Predicate>> {
    match predicate {
        Predicate::True => Some(Vec::new()),
        Predicate::And(children) => Some(children.clone()),
        Predicate::Or(_) | Predicate::Not(_) | Predicate::False => None,
        leaf => Some(vec![leaf.clone()]),
    }
}

fn indexable_path<R: Record>(path: &str) -> bool {
    matches!(R::field_cardinality(path), Some(FieldCardinality::One))
}

pub fn choose<R: Record>(
    predicate: &Predicate,
    descriptors: &[IndexDescriptor],
    states: &HashMap<String, IndexState>,
) -> Plan {
    let conjuncts = match conjuncts(predicate) {
        Some(conjuncts) => conjuncts,
        None => {
            debug!(record = R::TYPE, "non-conjunctive predicate, full scan");
            return full_scan(predicate);
        }
    };

    // first equality per path wins; duplicates stay residual
    let mut equalities: HashMap<&str, (usize, &Value)> = HashMap::new();
    for (position, conjunct) in conjuncts.iter().enumerate() {
        if let Predicate::Compare {
            path,
            op: CompareOp::Eq,
            value,
        } = conjunct
        {
            if indexable_path::<R>(path) {
                equalities.entry(*path).or_insert((position, value));
            }
        }
    }

    let readable = |descriptor: &IndexDescriptor| {
        states
            .get(&descriptor.name)
            .is_some_and(|state| state.is_readable())
    };

    // rule: compound scalar index with an equality-covered leading prefix
    let mut best_compound: Option<(usize, &IndexDescriptor, Vec<usize>, Vec<Value>)> = None;
    for descriptor in descriptors {
        if descriptor.kind != IndexKind::Scalar
            || descriptor.key_paths.len() < 2
            || !readable(descriptor)
        {
            continue;
        }
        let mut consumed = Vec::new();
        let mut values = Vec::new();
        for path in &descriptor.key_paths {
            match equalities.get(*path).copied() {
                Some((position, value)) => {
                    consumed.push(position);
                    values.push(value.clone());
                }
                None => break,
            }
        }
        if values.len() >= 2
            && best_compound
                .as_ref()
                .is_none_or(|(best_len, ..)| values.len() > *best_len)
        {
            best_compound = Some((values.len(), descriptor, consumed, values));
        }
    }
    if let Some((_, descriptor, consumed, values)) = best_compound {
        debug!(record = R::TYPE, index = %descriptor.name, "compound equality plan");
        return Plan::IndexEq {
            index: descriptor.clone(),
            values,
            residual: residual_without(&conjuncts, &consumed),
        };
    }

    // rule: single-field equality
    for descriptor in descriptors {
        let eq_capable = matches!(descriptor.kind, IndexKind::Scalar | IndexKind::Bitmap);
        if !eq_capable || descriptor.key_paths.len() != 1 || !readable(descriptor) {
            continue;
        }
        if let Some((position, value)) = equalities.get(descriptor.key_paths[0]).copied() {
            debug!(record = R::TYPE, index = %descriptor.name, "single equality plan");
            return Plan::IndexEq {
                index: descriptor.clone(),
                values: vec![value.clone()],
                residual: residual_without(&conjuncts, &[position]),
            };
        }
    }

    // rule: single-field range
    for descriptor in descriptors {
        if descriptor.kind != IndexKind::Scalar
            || descriptor.key_paths.len() != 1
            || !readable(descriptor)
        {
            continue;
        }
        let path = descriptor.key_paths[0];
        if !indexable_path::<R>(path) {
            continue;
        }

        let mut lower: Option<Bound> = None;
        let mut upper: Option<Bound> = None;
        let mut consumed = Vec::new();
        for (position, conjunct) in conjuncts.iter().enumerate() {
            let (op, value) = match conjunct {
                Predicate::Compare {
                    path: conjunct_path,
                    op,
                    value,
                } if *conjunct_path == path => (op, value),
                _ => continue,
            };
            match op {
                CompareOp::Gt | CompareOp::Ge if lower.is_none() => {
                    lower = Some(Bound {
                        value: value.clone(),
                        inclusive: *op == CompareOp::Ge,
                    });
                    consumed.push(position);
                }
                CompareOp::Lt | CompareOp::Le if upper.is_none() => {
                    upper = Some(Bound {
                        value: value.clone(),
                        inclusive: *op == CompareOp::Le,
                    });
                    consumed.push(position);
                }
                _ => {}
            }
        }

        if lower.is_some() || upper.is_some() {
            debug!(record = R::TYPE, index = %descriptor.name, "range plan");
            return Plan::IndexRange {
                index: descriptor.clone(),
                lower,
                upper,
                residual: residual_without(&conjuncts, &consumed),
            };
        }
    }

    debug!(record = R::TYPE, "no usable index, full scan");
    full_scan(predicate)
}

fn full_scan(predicate: &Predicate) -> Plan {
    let residual = match predicate {
        Predicate::True => Vec::new(),
        other => vec![other.clone()],
    };
    Plan::FullScan { residual }
}

fn residual_without(conjuncts: &[Predicate], consumed: &[usize]) -> Vec<Predicate> {
    conjuncts
        .iter()
        .enumerate()
        .filter(|(position, _)| !consumed.contains(position))
        .map(|(_, conjunct)| conjunct.clone())
        .collect()
}

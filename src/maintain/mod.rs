//! Index maintenance: translating record changes into index mutations.
//!
//! Every write flows through [`IndexMaintenance::apply`]: the states for all
//! of the type's descriptors are fetched with one range read, then each
//! maintained index gets the `(old, new)` pair and produces its own KV
//! mutations. Set-valued kinds diff old and new key sets; aggregate kinds
//! apply deltas. The record and its index entries always mutate in the same
//! transaction, so readers never observe one without the other.

use lodestone_core::kv::KvTransaction;
use lodestone_core::{
    tuple, IndexDescriptor, IndexKind, IndexState, Record, StoreError, Value,
};

use crate::layout::StoreLayout;
use crate::state::IndexStateManager;
use crate::violations::ViolationTracker;

pub mod aggregate;
pub mod distinct;
pub mod graph;
pub mod leaderboard;
pub mod minmax;
pub mod scalar;

/// Everything a maintainer needs for one index.
pub struct MaintainContext<'a> {
    pub descriptor: &'a IndexDescriptor,
    pub state: IndexState,
    pub space: lodestone_core::Subspace,
    pub violations: &'a ViolationTracker,
}

#[derive(Clone)]
pub struct IndexMaintenance {
    layout: StoreLayout,
    states: IndexStateManager,
    violations: ViolationTracker,
}

impl IndexMaintenance {
    pub fn new(layout: StoreLayout) -> Self {
        let states = IndexStateManager::new(layout.index_states());
        let violations = ViolationTracker::new(layout.violations());
        Self {
            layout,
            states,
            violations,
        }
    }

    pub fn states(&self) -> &IndexStateManager {
        &self.states
    }

    pub fn violations(&self) -> &ViolationTracker {
        &self.violations
    }

    /// Maintain every index of `R` for one record change. `old` is the
    /// stored version being replaced (if any), `new` the incoming one (if
    /// any); delete passes `(old, None)`.
    pub fn apply<R: Record, Tx: KvTransaction>(
        &self,
        tx: &mut Tx,
        old: Option<&R>,
        new: Option<&R>,
    ) -> Result<(), StoreError> {
        let descriptors = R::indexes();
        let states = self.states.effective_all(tx, &descriptors)?;

        for descriptor in &descriptors {
            let state = states[&descriptor.name];
            if !state.should_maintain() {
                continue;
            }
            self.apply_one(tx, descriptor, state, old, new)?;
        }
        Ok(())
    }

    /// Maintain a single index, used by [`apply`] and by index backfills.
    pub fn apply_one<R: Record, Tx: KvTransaction>(
        &self,
        tx: &mut Tx,
        descriptor: &IndexDescriptor,
        state: IndexState,
        old: Option<&R>,
        new: Option<&R>,
    ) -> Result<(), StoreError> {
        if !state.should_maintain() {
            return Err(StoreError::StateViolation {
                index: descriptor.name.clone(),
                state,
            });
        }

        let ctx = MaintainContext {
            descriptor,
            state,
            space: self.layout.index(&descriptor.name),
            violations: &self.violations,
        };

        match &descriptor.kind {
            IndexKind::Scalar => scalar::update_scalar(&ctx, tx, old, new),
            IndexKind::Bitmap => scalar::update_bitmap(&ctx, tx, old, new),
            IndexKind::Count => aggregate::update_count(&ctx, tx, old, new),
            IndexKind::Sum => aggregate::update_sum(&ctx, tx, old, new),
            IndexKind::Average => aggregate::update_average(&ctx, tx, old, new),
            IndexKind::Min => minmax::update(&ctx, tx, old, new, minmax::Extremum::Min),
            IndexKind::Max => minmax::update(&ctx, tx, old, new, minmax::Extremum::Max),
            IndexKind::Distinct { precision } => distinct::update(&ctx, tx, new, *precision),
            IndexKind::Graph {
                direction,
                edge_path,
            } => graph::update(&ctx, tx, old, new, *direction, edge_path),
            IndexKind::TimeWindowLeaderboard {
                window,
                window_count,
                group_by,
            } => leaderboard::update(&ctx, tx, old, new, *window, *window_count, *group_by),
        }
    }
}

/// Extract one field value; an unknown path is a schema error.
pub(crate) fn extract_path<R: Record>(record: &R, path: &str) -> Result<Value, StoreError> {
    record.extract(path).ok_or_else(|| {
        StoreError::validation(format!("{} has no field named {path}", R::TYPE))
    })
}

pub(crate) fn extract_tuple<R: Record>(
    record: &R,
    paths: &[&'static str],
) -> Result<Vec<Value>, StoreError> {
    paths.iter().map(|path| extract_path(record, path)).collect()
}

/// The packed primary key tuple. Primary keys are compared and stored only
/// in this packed form.
pub(crate) fn packed_pk<R: Record>(record: &R) -> Result<Vec<u8>, StoreError> {
    let pk = record.primary_key();
    if pk.is_empty() {
        return Err(StoreError::validation(format!(
            "{} record has an empty primary key",
            R::TYPE
        )));
    }
    Ok(tuple::pack(&pk))
}

/// Coerce a field value into the aggregate number domain. Null contributes
/// zero; anything non-numeric is a schema error.
pub(crate) fn numeric(value: &Value) -> Result<f64, StoreError> {
    match value {
        Value::Int(v) => Ok(*v as f64),
        Value::Double(v) => Ok(*v),
        Value::Null => Ok(0.0),
        other => Err(StoreError::validation(format!(
            "expected a numeric field value, got {other}"
        ))),
    }
}

/// Whether two value tuples are the same index entry.
pub(crate) fn same_tuple(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_element(y))
}

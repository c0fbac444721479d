//! The public store facade.
//!
//! [`RecordStore`] is the entry point for applications: every operation
//! opens one KV transaction, evaluates security, runs through the scoped
//! [`StoreTransaction`] view, and reports its outcome to the metrics
//! delegate. The scoped view reuses the pre-resolved subspaces and the
//! index maintenance service, and is what `with_transaction` hands to
//! caller-supplied bodies so multiple operations can share one atomic
//! commit.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use lodestone_core::kv::{KvEngine, KvTransaction};
use lodestone_core::{
    IndexDescriptor, IndexKind, Record, StoreError, Subspace, TransactionConfig, Value,
};

use crate::codec::{decode_record, encode_record};
use crate::items::{ItemConfig, ItemStore};
use crate::layout::StoreLayout;
use crate::maintain::{aggregate, distinct, graph, leaderboard, minmax, scalar, IndexMaintenance};
use crate::query::exec::{self, ExecContext, ASSUMED_AVERAGE_ROW_BYTES};
use crate::query::{Bound, Query};
use crate::violations::Violation;

pub mod metrics;
pub mod security;

pub use crate::maintain::graph::Neighbor;
pub use crate::maintain::leaderboard::Standing;
pub use metrics::{MetricsDelegate, NoopMetrics};
pub use security::{AdminOperation, AllowAll, SecurityDelegate};

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root prefix under which every store key lives.
    pub root: Subspace,
    pub items: ItemConfig,
    /// Config applied to transactions the facade opens on its own.
    pub transaction: TransactionConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: Subspace::from_tuple(&[Value::from("lodestone")]),
            items: ItemConfig::default(),
            transaction: TransactionConfig::default(),
        }
    }
}

pub struct RecordStore<E: KvEngine> {
    engine: E,
    layout: StoreLayout,
    items: ItemStore,
    maintenance: IndexMaintenance,
    security: Arc<dyn SecurityDelegate>,
    metrics: Arc<dyn MetricsDelegate>,
    config: StoreConfig,
}

impl<E: KvEngine> Clone for RecordStore<E> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            layout: self.layout.clone(),
            items: self.items.clone(),
            maintenance: self.maintenance.clone(),
            security: Arc::clone(&self.security),
            metrics: Arc::clone(&self.metrics),
            config: self.config.clone(),
        }
    }
}

impl<E: KvEngine> RecordStore<E> {
    pub fn new(engine: E) -> Self {
        Self::with_config(engine, StoreConfig::default())
    }

    pub fn with_config(engine: E, config: StoreConfig) -> Self {
        let layout = StoreLayout::new(config.root.clone());
        let items = ItemStore::new(layout.blobs().clone(), config.items.clone());
        let maintenance = IndexMaintenance::new(layout.clone());
        Self {
            engine,
            layout,
            items,
            maintenance,
            security: Arc::new(AllowAll),
            metrics: Arc::new(NoopMetrics),
            config,
        }
    }

    pub fn with_security(mut self, security: Arc<dyn SecurityDelegate>) -> Self {
        self.security = security;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsDelegate>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn migration(&self) -> crate::migrate::MigrationController<'_, E> {
        crate::migrate::MigrationController::new(self)
    }

    pub(crate) fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Run `body` inside one transaction with a scoped store view. The body
    /// must be idempotent: conflicts re-run it from a fresh snapshot.
    pub fn with_transaction<T>(
        &self,
        config: &TransactionConfig,
        mut body: impl FnMut(&mut StoreTransaction<'_, E::Tx>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.engine.with_transaction(config, |tx| {
            let mut view = StoreTransaction {
                tx,
                layout: &self.layout,
                items: &self.items,
                maintenance: &self.maintenance,
                security: self.security.as_ref(),
            };
            body(&mut view)
        })
    }

    fn run<T>(
        &self,
        body: impl FnMut(&mut StoreTransaction<'_, E::Tx>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.with_transaction(&self.config.transaction.clone(), body)
    }

    // ============ read operations ============

    pub fn fetch_all<R: Record>(&self) -> Result<Vec<R>, StoreError> {
        let started = Instant::now();
        let result = self.run(|view| view.fetch_all::<R>());
        self.report_fetch::<R>(&started, result.as_ref().map(Vec::len));
        result
    }

    pub fn fetch<R: Record>(&self, pk: &[Value]) -> Result<Option<R>, StoreError> {
        let started = Instant::now();
        let result = self.run(|view| view.fetch::<R>(pk));
        self.report_fetch::<R>(
            &started,
            result.as_ref().map(|record| usize::from(record.is_some())),
        );
        result
    }

    pub fn fetch_query<R: Record>(&self, query: &Query<R>) -> Result<Vec<R>, StoreError> {
        let started = Instant::now();
        let result = self.run(|view| view.fetch_query(query));
        self.report_fetch::<R>(&started, result.as_ref().map(Vec::len));
        result
    }

    pub fn fetch_count<R: Record>(&self, query: &Query<R>) -> Result<usize, StoreError> {
        let started = Instant::now();
        let result = self.run(|view| view.fetch_count(query));
        self.report_fetch::<R>(&started, result.as_ref().map(|count| *count));
        result
    }

    /// O(1) record count estimate from the engine's range size estimate.
    pub fn estimated_record_count<R: Record>(&self) -> Result<i64, StoreError> {
        self.run(|view| {
            let (begin, end) = view.layout.items_of(R::TYPE).range();
            let bytes = view.tx.estimated_range_size(&begin, &end)?;
            Ok(bytes / ASSUMED_AVERAGE_ROW_BYTES)
        })
    }

    // ============ write operations ============

    pub fn save<R: Record>(&self, records: &[R]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let started = Instant::now();
        let result = self.run(|view| {
            for record in records {
                view.save(record)?;
            }
            Ok(())
        });
        match &result {
            Ok(()) => self
                .metrics
                .did_save(R::TYPE, records.len(), started.elapsed()),
            Err(_) => self.metrics.did_fail_save(R::TYPE, started.elapsed()),
        }
        result
    }

    pub fn delete<R: Record>(&self, records: &[R]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let pks: Vec<Vec<Value>> = records.iter().map(Record::primary_key).collect();
        self.delete_ids::<R>(&pks)
    }

    pub fn delete_by_id<R: Record>(&self, pk: &[Value]) -> Result<(), StoreError> {
        self.delete_ids::<R>(std::slice::from_ref(&pk.to_vec()))
    }

    fn delete_ids<R: Record>(&self, pks: &[Vec<Value>]) -> Result<(), StoreError> {
        if pks.is_empty() {
            return Ok(());
        }
        let started = Instant::now();
        let result = self.run(|view| {
            for pk in pks {
                view.delete_by_id::<R>(pk)?;
            }
            Ok(())
        });
        match &result {
            Ok(()) => self
                .metrics
                .did_delete(R::TYPE, pks.len(), started.elapsed()),
            Err(_) => self.metrics.did_fail_delete(R::TYPE, started.elapsed()),
        }
        result
    }

    /// Apply inserts and deletes atomically in one batch-priority
    /// transaction.
    pub fn execute_batch<R: Record>(
        &self,
        inserts: &[R],
        deletes: &[Vec<Value>],
    ) -> Result<(), StoreError> {
        if inserts.is_empty() && deletes.is_empty() {
            return Ok(());
        }
        let started = Instant::now();
        let result = self.with_transaction(&TransactionConfig::batch(), |view| {
            for record in inserts {
                view.save(record)?;
            }
            for pk in deletes {
                view.delete_by_id::<R>(pk)?;
            }
            Ok(())
        });
        let count = inserts.len() + deletes.len();
        match &result {
            Ok(()) => self.metrics.did_batch(R::TYPE, count, started.elapsed()),
            Err(_) => self.metrics.did_fail_batch(R::TYPE, started.elapsed()),
        }
        result
    }

    /// Remove every record of `R` along with every entry of its declared
    /// indexes. Admin only.
    pub fn clear_all<R: Record>(&self) -> Result<(), StoreError> {
        self.security
            .require_admin(AdminOperation::ClearAll, R::TYPE)?;
        debug!(record = R::TYPE, "clearing type");
        self.with_transaction(&TransactionConfig::batch(), |view| {
            view.clear_type_unchecked::<R>()
        })
    }

    // ============ index read operations ============

    pub fn count_for<R: Record>(&self, index: &str, group: &[Value]) -> Result<i64, StoreError> {
        self.run(|view| view.count_for::<R>(index, group))
    }

    pub fn sum_for<R: Record>(&self, index: &str, group: &[Value]) -> Result<f64, StoreError> {
        self.run(|view| view.sum_for::<R>(index, group))
    }

    pub fn average_for<R: Record>(&self, index: &str, group: &[Value]) -> Result<f64, StoreError> {
        self.run(|view| view.average_for::<R>(index, group))
    }

    pub fn min_for<R: Record>(&self, index: &str, group: &[Value]) -> Result<Value, StoreError> {
        self.run(|view| view.min_for::<R>(index, group))
    }

    pub fn max_for<R: Record>(&self, index: &str, group: &[Value]) -> Result<Value, StoreError> {
        self.run(|view| view.max_for::<R>(index, group))
    }

    pub fn distinct_count_for<R: Record>(
        &self,
        index: &str,
        group: &[Value],
    ) -> Result<u64, StoreError> {
        self.run(|view| view.distinct_count_for::<R>(index, group))
    }

    pub fn neighbors<R: Record>(
        &self,
        index: &str,
        node: &Value,
        edge: Option<&Value>,
    ) -> Result<Vec<Neighbor>, StoreError> {
        self.run(|view| view.neighbors::<R>(index, node, edge, None))
    }

    /// Top `k` of the most recent window currently present for the group.
    pub fn top_k<R: Record>(
        &self,
        index: &str,
        group: &[Value],
        k: usize,
    ) -> Result<Vec<Standing>, StoreError> {
        self.run(|view| view.top_k::<R>(index, group, k))
    }

    pub fn top_k_in_window<R: Record>(
        &self,
        index: &str,
        group: &[Value],
        window: i64,
        k: usize,
    ) -> Result<Vec<Standing>, StoreError> {
        self.run(|view| view.top_k_in_window::<R>(index, group, window, k))
    }

    /// Primary keys indexed under one exact value of a scalar or bitmap
    /// index.
    pub fn scan_index<R: Record>(
        &self,
        index: &str,
        values: &[Value],
    ) -> Result<Vec<Vec<Value>>, StoreError> {
        self.run(|view| view.scan_index::<R>(index, values, None))
    }

    /// Primary keys indexed under a bounded value range of a single-field
    /// scalar index, in index order.
    pub fn scan_index_range<R: Record>(
        &self,
        index: &str,
        lower: Option<Bound>,
        upper: Option<Bound>,
        limit: Option<usize>,
    ) -> Result<Vec<Vec<Value>>, StoreError> {
        self.run(|view| view.scan_index_range::<R>(index, lower.clone(), upper.clone(), limit))
    }

    pub fn list_violations(
        &self,
        index: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Violation>, StoreError> {
        self.run(|view| {
            view.maintenance.violations().list(view.tx, index, limit)
        })
    }

    fn report_fetch<R: Record>(&self, started: &Instant, count: Result<usize, &StoreError>) {
        match count {
            Ok(count) => self.metrics.did_fetch(R::TYPE, count, started.elapsed()),
            Err(_) => self.metrics.did_fail_fetch(R::TYPE, started.elapsed()),
        }
    }
}

/// A scoped view of the store inside one open transaction.
pub struct StoreTransaction<'t, Tx: KvTransaction> {
    tx: &'t mut Tx,
    layout: &'t StoreLayout,
    items: &'t ItemStore,
    maintenance: &'t IndexMaintenance,
    security: &'t dyn SecurityDelegate,
}

impl<'t, Tx: KvTransaction> StoreTransaction<'t, Tx> {
    fn exec_context(&self) -> ExecContext<'t> {
        ExecContext {
            layout: self.layout,
            items: self.items,
            states: self.maintenance.states(),
        }
    }

    pub fn fetch<R: Record>(&mut self, pk: &[Value]) -> Result<Option<R>, StoreError> {
        let key = self.layout.item_key(R::TYPE, pk);
        let record = match self.items.read(self.tx, &key)? {
            Some(blob) => Some(decode_record::<R>(&blob)?),
            None => None,
        };
        if record.is_some() {
            self.security.evaluate_get(R::TYPE, pk)?;
        }
        Ok(record)
    }

    pub fn fetch_all<R: Record>(&mut self) -> Result<Vec<R>, StoreError> {
        self.security.evaluate_list(R::TYPE, None, 0)?;
        let (begin, end) = self.layout.items_of(R::TYPE).range();
        let items = self.items.scan(self.tx, &begin, &end, None)?;
        let mut records = Vec::with_capacity(items.len());
        for (_, blob) in items {
            records.push(decode_record::<R>(&blob)?);
        }
        Ok(records)
    }

    pub fn fetch_query<R: Record>(&mut self, query: &Query<R>) -> Result<Vec<R>, StoreError> {
        self.security
            .evaluate_list(R::TYPE, query.limit, query.offset)?;
        exec::fetch(&self.exec_context(), self.tx, query)
    }

    pub fn fetch_count<R: Record>(&mut self, query: &Query<R>) -> Result<usize, StoreError> {
        self.security
            .evaluate_list(R::TYPE, query.limit, query.offset)?;
        exec::count(&self.exec_context(), self.tx, query)
    }

    pub fn save<R: Record>(&mut self, record: &R) -> Result<(), StoreError> {
        let pk = validated_pk(record)?;
        let key = self.layout.item_key(R::TYPE, &pk);
        let old = match self.items.read(self.tx, &key)? {
            Some(blob) => Some(decode_record::<R>(&blob)?),
            None => None,
        };

        if old.is_some() {
            self.security.evaluate_update(R::TYPE, &pk)?;
        } else {
            self.security.evaluate_create(R::TYPE, &pk)?;
        }

        self.save_inner(record, old, &key)
    }

    /// Save without security evaluation; the migration path.
    pub(crate) fn save_unchecked<R: Record>(&mut self, record: &R) -> Result<(), StoreError> {
        let pk = validated_pk(record)?;
        let key = self.layout.item_key(R::TYPE, &pk);
        let old = match self.items.read(self.tx, &key)? {
            Some(blob) => Some(decode_record::<R>(&blob)?),
            None => None,
        };
        self.save_inner(record, old, &key)
    }

    fn save_inner<R: Record>(
        &mut self,
        record: &R,
        old: Option<R>,
        key: &[u8],
    ) -> Result<(), StoreError> {
        self.maintenance
            .apply(self.tx, old.as_ref(), Some(record))?;
        self.items.write(self.tx, key, &encode_record(record)?)
    }

    pub fn delete<R: Record>(&mut self, record: &R) -> Result<(), StoreError> {
        self.delete_by_id::<R>(&record.primary_key())
    }

    /// Deleting an absent primary key is a no-op.
    pub fn delete_by_id<R: Record>(&mut self, pk: &[Value]) -> Result<(), StoreError> {
        let key = self.layout.item_key(R::TYPE, pk);
        let old = match self.items.read(self.tx, &key)? {
            Some(blob) => decode_record::<R>(&blob)?,
            None => return Ok(()),
        };
        self.security.evaluate_delete(R::TYPE, pk)?;
        self.delete_inner(&old, &key)
    }

    pub(crate) fn delete_unchecked<R: Record>(&mut self, pk: &[Value]) -> Result<(), StoreError> {
        let key = self.layout.item_key(R::TYPE, pk);
        let old = match self.items.read(self.tx, &key)? {
            Some(blob) => decode_record::<R>(&blob)?,
            None => return Ok(()),
        };
        self.delete_inner(&old, &key)
    }

    fn delete_inner<R: Record>(&mut self, old: &R, key: &[u8]) -> Result<(), StoreError> {
        self.maintenance.apply::<R, Tx>(self.tx, Some(old), None)?;
        self.items.delete(self.tx, key)
    }

    pub(crate) fn clear_type_unchecked<R: Record>(&mut self) -> Result<(), StoreError> {
        let (begin, end) = self.layout.items_of(R::TYPE).range();
        self.tx.clear_range(&begin, &end);
        for descriptor in R::indexes() {
            let (begin, end) = self.layout.index(&descriptor.name).range();
            self.tx.clear_range(&begin, &end);
        }
        Ok(())
    }

    // ============ index reads ============

    fn readable_index<R: Record>(
        &mut self,
        index: &str,
        expected: &[IndexKind],
    ) -> Result<(IndexDescriptor, Subspace), StoreError> {
        let descriptor = R::indexes()
            .into_iter()
            .find(|descriptor| descriptor.name == index)
            .ok_or_else(|| {
                StoreError::validation(format!("{} declares no index named {index}", R::TYPE))
            })?;

        let matches_kind = expected.iter().any(|kind| {
            std::mem::discriminant(kind) == std::mem::discriminant(&descriptor.kind)
        });
        if !matches_kind {
            return Err(StoreError::validation(format!(
                "index {index} does not support this operation"
            )));
        }

        let state = self
            .maintenance
            .states()
            .effective(self.tx, &descriptor)?;
        if !state.is_readable() {
            return Err(StoreError::StateViolation {
                index: index.to_string(),
                state,
            });
        }
        Ok((descriptor, self.layout.index(index)))
    }

    pub fn count_for<R: Record>(
        &mut self,
        index: &str,
        group: &[Value],
    ) -> Result<i64, StoreError> {
        let (_, space) = self.readable_index::<R>(index, &[IndexKind::Count])?;
        aggregate::read_count(&space, self.tx, group)
    }

    pub fn sum_for<R: Record>(&mut self, index: &str, group: &[Value]) -> Result<f64, StoreError> {
        let (_, space) = self.readable_index::<R>(index, &[IndexKind::Sum])?;
        aggregate::read_sum(&space, self.tx, group)
    }

    pub fn average_for<R: Record>(
        &mut self,
        index: &str,
        group: &[Value],
    ) -> Result<f64, StoreError> {
        let (_, space) = self.readable_index::<R>(index, &[IndexKind::Average])?;
        aggregate::read_average(&space, index, self.tx, group)
    }

    pub fn min_for<R: Record>(&mut self, index: &str, group: &[Value]) -> Result<Value, StoreError> {
        let (_, space) = self.readable_index::<R>(index, &[IndexKind::Min])?;
        minmax::read_extremum(&space, index, self.tx, group)
    }

    pub fn max_for<R: Record>(&mut self, index: &str, group: &[Value]) -> Result<Value, StoreError> {
        let (_, space) = self.readable_index::<R>(index, &[IndexKind::Max])?;
        minmax::read_extremum(&space, index, self.tx, group)
    }

    pub fn distinct_count_for<R: Record>(
        &mut self,
        index: &str,
        group: &[Value],
    ) -> Result<u64, StoreError> {
        let (_, space) =
            self.readable_index::<R>(index, &[IndexKind::Distinct { precision: 0 }])?;
        distinct::read_estimate(&space, self.tx, group)
    }

    pub fn neighbors<R: Record>(
        &mut self,
        index: &str,
        node: &Value,
        edge: Option<&Value>,
        limit: Option<usize>,
    ) -> Result<Vec<Neighbor>, StoreError> {
        let (_, space) = self.readable_index::<R>(
            index,
            &[IndexKind::Graph {
                direction: lodestone_core::GraphDirection::Outgoing,
                edge_path: "",
            }],
        )?;
        graph::neighbors(&space, self.tx, node, edge, limit)
    }

    pub fn top_k<R: Record>(
        &mut self,
        index: &str,
        group: &[Value],
        k: usize,
    ) -> Result<Vec<Standing>, StoreError> {
        let (_, space) = self.readable_index::<R>(
            index,
            &[IndexKind::TimeWindowLeaderboard {
                window: 0,
                window_count: 0,
                group_by: 0,
            }],
        )?;
        match leaderboard::latest_window(&space, self.tx, group)? {
            Some(window) => leaderboard::top_k(&space, self.tx, group, window, k),
            None => Ok(Vec::new()),
        }
    }

    pub fn top_k_in_window<R: Record>(
        &mut self,
        index: &str,
        group: &[Value],
        window: i64,
        k: usize,
    ) -> Result<Vec<Standing>, StoreError> {
        let (_, space) = self.readable_index::<R>(
            index,
            &[IndexKind::TimeWindowLeaderboard {
                window: 0,
                window_count: 0,
                group_by: 0,
            }],
        )?;
        leaderboard::top_k(&space, self.tx, group, window, k)
    }

    pub fn scan_index<R: Record>(
        &mut self,
        index: &str,
        values: &[Value],
        limit: Option<usize>,
    ) -> Result<Vec<Vec<Value>>, StoreError> {
        let (_, space) =
            self.readable_index::<R>(index, &[IndexKind::Scalar, IndexKind::Bitmap])?;
        scalar::scan_value(&space, self.tx, values, limit)
    }

    pub fn scan_index_range<R: Record>(
        &mut self,
        index: &str,
        lower: Option<Bound>,
        upper: Option<Bound>,
        limit: Option<usize>,
    ) -> Result<Vec<Vec<Value>>, StoreError> {
        let (descriptor, space) = self.readable_index::<R>(index, &[IndexKind::Scalar])?;
        if descriptor.key_paths.len() != 1 {
            return Err(StoreError::validation(
                "range scans need a single-field index",
            ));
        }
        let (begin, end) = exec::range_bounds(&space, lower.as_ref(), upper.as_ref());
        let pks = exec::scan_range_pks(self.tx, &space, begin, end, limit)?;
        pks.iter()
            .map(|pk| Ok(lodestone_core::unpack(pk)?))
            .collect()
    }

    pub fn list_violations(
        &mut self,
        index: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Violation>, StoreError> {
        self.maintenance.violations().list(self.tx, index, limit)
    }

    pub(crate) fn kv(&mut self) -> &mut Tx {
        self.tx
    }

    pub(crate) fn maintenance(&self) -> &'t IndexMaintenance {
        self.maintenance
    }

    pub(crate) fn layout(&self) -> &'t StoreLayout {
        self.layout
    }

    /// Scan raw item blobs of a type, `batch` entries at a time, starting
    /// strictly after `resume_after` (an item key). Used by migrations.
    pub(crate) fn scan_items_page<R: Record>(
        &mut self,
        resume_after: Option<&[u8]>,
        batch: usize,
    ) -> Result<Vec<(Vec<u8>, R)>, StoreError> {
        let (first, end) = self.layout.items_of(R::TYPE).range();
        let begin = match resume_after {
            Some(key) => {
                let mut next = key.to_vec();
                next.push(0x00);
                next
            }
            None => first,
        };

        let items = self.items.scan(self.tx, &begin, &end, Some(batch))?;
        let mut page = Vec::with_capacity(items.len());
        for (key, blob) in items {
            page.push((key, decode_record::<R>(&blob)?));
        }
        Ok(page)
    }
}

fn validated_pk<R: Record>(record: &R) -> Result<Vec<Value>, StoreError> {
    let pk = record.primary_key();
    if pk.is_empty() {
        return Err(StoreError::validation(format!(
            "{} record has an empty primary key",
            R::TYPE
        )));
    }
    if pk.iter().all(|value| matches!(value, Value::Null)) {
        return Err(StoreError::validation(format!(
            "{} record has an all-null primary key",
            R::TYPE
        )));
    }
    Ok(pk)
}

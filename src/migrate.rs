//! Schema migrations and online index builds.
//!
//! The controller operates on subspaces directly and bypasses
//! application-level security: migrations run with the operator's
//! authority, not a user's. Index builds walk the state machine
//! `disabled → writeOnly → readable`: while write-only, live writers
//! maintain the index and uniqueness conflicts are tracked instead of
//! fatal; the backfill then sweeps existing records in bounded batches
//! before the index is promoted.

use tracing::{debug, info};

use lodestone_core::kv::{KvEngine, KvTransaction};
use lodestone_core::{
    IndexDescriptor, IndexState, Record, StoreError, TransactionConfig, Value,
};

use crate::store::{RecordStore, StoreTransaction};
use crate::violations::Violation;

/// Persisted schema version triple; monotone under migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SchemaVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    fn to_values(self) -> Vec<Value> {
        vec![
            Value::from(self.major),
            Value::from(self.minor),
            Value::from(self.patch),
        ]
    }

    fn from_values(values: &[Value]) -> Result<Self, StoreError> {
        match values {
            [Value::Int(major), Value::Int(minor), Value::Int(patch)] => Ok(Self {
                major: u32::try_from(*major)
                    .map_err(|_| StoreError::decode("schema version out of range"))?,
                minor: u32::try_from(*minor)
                    .map_err(|_| StoreError::decode("schema version out of range"))?,
                patch: u32::try_from(*patch)
                    .map_err(|_| StoreError::decode("schema version out of range"))?,
            }),
            _ => Err(StoreError::decode("malformed schema version")),
        }
    }
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

pub struct MigrationController<'a, E: KvEngine> {
    store: &'a RecordStore<E>,
}

impl<'a, E: KvEngine> MigrationController<'a, E> {
    pub(crate) fn new(store: &'a RecordStore<E>) -> Self {
        Self { store }
    }

    fn run<T>(
        &self,
        body: impl FnMut(&mut StoreTransaction<'_, E::Tx>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.store
            .with_transaction(&TransactionConfig::batch(), body)
    }

    // ============ schema version ============

    pub fn schema_version(&self) -> Result<Option<SchemaVersion>, StoreError> {
        let key = self.store.layout().schema_version_key();
        self.run(|view| match view.kv().get(&key)? {
            Some(raw) => Ok(Some(SchemaVersion::from_values(&lodestone_core::unpack(
                &raw,
            )?)?)),
            None => Ok(None),
        })
    }

    /// Set the schema version; regressions are rejected.
    pub fn set_schema_version(&self, version: SchemaVersion) -> Result<(), StoreError> {
        let key = self.store.layout().schema_version_key();
        self.run(|view| {
            if let Some(raw) = view.kv().get(&key)? {
                let current = SchemaVersion::from_values(&lodestone_core::unpack(&raw)?)?;
                if version < current {
                    return Err(StoreError::validation(format!(
                        "schema version may not regress from {current} to {version}"
                    )));
                }
            }
            view.kv()
                .set(&key, &lodestone_core::pack(&version.to_values()));
            Ok(())
        })?;
        info!(%version, "schema version set");
        Ok(())
    }

    // ============ direct record operations (no security) ============

    pub fn count<R: Record>(&self) -> Result<usize, StoreError> {
        self.run(|view| {
            let (begin, end) = view.layout().items_of(R::TYPE).range();
            let entries = view.kv().get_range(
                lodestone_core::RangeScan::new(begin, end)
                    .mode(lodestone_core::StreamingMode::WantAll),
            )?;
            Ok(entries.len())
        })
    }

    pub fn update<R: Record>(&self, record: &R) -> Result<(), StoreError> {
        self.run(|view| view.save_unchecked(record))
    }

    pub fn delete<R: Record>(&self, pk: &[Value]) -> Result<(), StoreError> {
        self.run(|view| view.delete_unchecked::<R>(pk))
    }

    /// Rewrite the given records in transactions of `batch_size`, keeping
    /// every index consistent along the way.
    pub fn batch_update<R: Record>(
        &self,
        records: &[R],
        batch_size: usize,
    ) -> Result<(), StoreError> {
        if batch_size == 0 {
            return Err(StoreError::validation("batch size must be positive"));
        }
        for chunk in records.chunks(batch_size) {
            self.run(|view| {
                for record in chunk {
                    view.save_unchecked(record)?;
                }
                Ok(())
            })?;
            debug!(record = R::TYPE, count = chunk.len(), "migrated batch");
        }
        Ok(())
    }

    // ============ index build protocol ============

    /// `disabled → writeOnly`. Clears any stale index payload so a failed
    /// earlier build can be repeated from scratch; from here on, writers
    /// maintain the index but reads still ignore it.
    pub fn enable_index<R: Record>(&self, index: &str) -> Result<(), StoreError> {
        let descriptor = self.descriptor::<R>(index)?;
        self.run(|view| {
            let state = view
                .maintenance()
                .states()
                .effective(view.kv(), &descriptor)?;
            match state {
                IndexState::Disabled => {
                    let (begin, end) = view.layout().index(index).range();
                    view.kv().clear_range(&begin, &end);
                    view.maintenance()
                        .states()
                        .set(view.kv(), index, IndexState::WriteOnly);
                    Ok(())
                }
                IndexState::WriteOnly => Ok(()),
                IndexState::Readable => Err(StoreError::StateViolation {
                    index: index.to_string(),
                    state,
                }),
            }
        })
    }

    /// Backfill existing records into a write-only index, `batch_size`
    /// records per transaction. Uniqueness conflicts surface as tracked
    /// violations, never as failures.
    pub fn build_index<R: Record>(
        &self,
        index: &str,
        batch_size: usize,
    ) -> Result<usize, StoreError> {
        if batch_size == 0 {
            return Err(StoreError::validation("batch size must be positive"));
        }
        let descriptor = self.descriptor::<R>(index)?;

        let mut resume_after: Option<Vec<u8>> = None;
        let mut total = 0usize;
        loop {
            let resume = resume_after.clone();
            let page = self.run(|view| {
                let state = view
                    .maintenance()
                    .states()
                    .effective(view.kv(), &descriptor)?;
                if state != IndexState::WriteOnly {
                    return Err(StoreError::StateViolation {
                        index: index.to_string(),
                        state,
                    });
                }

                let page =
                    view.scan_items_page::<R>(resume.as_deref(), batch_size)?;
                for (_, record) in &page {
                    view.maintenance().apply_one(
                        view.kv(),
                        &descriptor,
                        IndexState::WriteOnly,
                        None::<&R>,
                        Some(record),
                    )?;
                }
                Ok(page.into_iter().map(|(key, _)| key).collect::<Vec<_>>())
            })?;

            total += page.len();
            match page.last() {
                Some(last) if page.len() == batch_size => {
                    resume_after = Some(last.clone());
                }
                _ => break,
            }
        }

        info!(index, total, "index backfill complete");
        Ok(total)
    }

    /// `writeOnly → readable`. From here on uniqueness violations are
    /// fatal; tracked conflicts from the build are left for the caller to
    /// resolve through the violation listing.
    pub fn make_readable<R: Record>(&self, index: &str) -> Result<(), StoreError> {
        let descriptor = self.descriptor::<R>(index)?;
        self.run(|view| {
            let state = view
                .maintenance()
                .states()
                .effective(view.kv(), &descriptor)?;
            match state {
                IndexState::WriteOnly => {
                    view.maintenance()
                        .states()
                        .set(view.kv(), index, IndexState::Readable);
                    Ok(())
                }
                IndexState::Readable => Ok(()),
                IndexState::Disabled => Err(StoreError::StateViolation {
                    index: index.to_string(),
                    state,
                }),
            }
        })
    }

    pub fn disable_index<R: Record>(&self, index: &str) -> Result<(), StoreError> {
        self.descriptor::<R>(index)?;
        self.run(|view| {
            view.maintenance()
                .states()
                .set(view.kv(), index, IndexState::Disabled);
            let (begin, end) = view.layout().index(index).range();
            view.kv().clear_range(&begin, &end);
            Ok(())
        })
    }

    pub fn index_state<R: Record>(&self, index: &str) -> Result<IndexState, StoreError> {
        let descriptor = self.descriptor::<R>(index)?;
        self.run(|view| view.maintenance().states().effective(view.kv(), &descriptor))
    }

    // ============ violation resolution ============

    pub fn violations(&self, index: &str) -> Result<Vec<Violation>, StoreError> {
        self.run(|view| view.list_violations(index, None))
    }

    pub fn resolve_violation(&self, violation: &Violation) -> Result<(), StoreError> {
        self.run(|view| {
            view.maintenance().violations().clear(view.kv(), violation);
            Ok(())
        })
    }

    pub fn clear_violations(&self, index: &str) -> Result<(), StoreError> {
        self.run(|view| {
            view.maintenance().violations().clear_index(view.kv(), index);
            Ok(())
        })
    }

    fn descriptor<R: Record>(&self, index: &str) -> Result<IndexDescriptor, StoreError> {
        R::indexes()
            .into_iter()
            .find(|descriptor| descriptor.name == index)
            .ok_or_else(|| {
                StoreError::validation(format!("{} declares no index named {index}", R::TYPE))
            })
    }
}

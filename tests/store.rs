//! Facade round-trips: save/fetch/delete, blobs, batches, delegates.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lodestone::{
    AdminOperation, MetricsDelegate, RecordStore, SecurityDelegate, StoreError, Value,
};
use lodestone_core::kv::{KvEngine, KvTransaction, RangeScan, TransactionConfig};
use lodestone_memkv::MemKv;
use lodestone_testing::User;

use common::{default_blob_region, open_store, open_store_with_small_blobs};

fn user(id: &str, email: &str) -> User {
    User::new(id, email, "US", 100, "active")
}

#[test]
fn test_save_then_fetch_roundtrip() {
    let store = open_store();
    let alice = user("u1", "alice@example.com");
    store.save(&[alice.clone()]).unwrap();

    let fetched: Option<User> = store.fetch(&[Value::from("u1")]).unwrap();
    assert_eq!(fetched, Some(alice));
}

#[test]
fn test_fetch_missing_returns_none() {
    let store = open_store();
    let fetched: Option<User> = store.fetch(&[Value::from("nobody")]).unwrap();
    assert_eq!(fetched, None);
}

#[test]
fn test_save_overwrites_same_primary_key() {
    let store = open_store();
    store.save(&[user("u1", "old@example.com")]).unwrap();

    let mut updated = user("u1", "new@example.com");
    updated.score = 900;
    store.save(&[updated.clone()]).unwrap();

    let fetched: Option<User> = store.fetch(&[Value::from("u1")]).unwrap();
    assert_eq!(fetched, Some(updated));
    assert_eq!(store.fetch_all::<User>().unwrap().len(), 1);
}

#[test]
fn test_fetch_all_returns_every_record() {
    let store = open_store();
    let users: Vec<User> = (0..5)
        .map(|i| user(&format!("u{i}"), &format!("u{i}@example.com")))
        .collect();
    store.save(&users).unwrap();

    let mut fetched = store.fetch_all::<User>().unwrap();
    fetched.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(fetched, users);
}

#[test]
fn test_delete_removes_record_and_entries() {
    let store = open_store();
    store.save(&[user("u1", "a@example.com")]).unwrap();
    store.delete_by_id::<User>(&[Value::from("u1")]).unwrap();

    assert_eq!(store.fetch::<User>(&[Value::from("u1")]).unwrap(), None);
    assert!(store
        .scan_index::<User>("user_email", &[Value::from("a@example.com")])
        .unwrap()
        .is_empty());
}

#[test]
fn test_delete_missing_is_a_noop() {
    let store = open_store();
    store.save(&[user("u1", "a@example.com")]).unwrap();
    // unknown pk commits cleanly and changes nothing
    store.delete_by_id::<User>(&[Value::from("ghost")]).unwrap();
    assert_eq!(store.fetch_all::<User>().unwrap().len(), 1);
}

#[test]
fn test_empty_save_and_delete_are_noops() {
    let store = open_store();
    store.save::<User>(&[]).unwrap();
    store.delete::<User>(&[]).unwrap();
    store.execute_batch::<User>(&[], &[]).unwrap();
}

#[test]
fn test_blob_roundtrip_and_cleanup() {
    let engine = MemKv::new();
    let store = open_store_with_small_blobs(engine.clone());

    // a record comfortably above the 256-byte inline threshold
    let mut big = user("u1", "big@example.com");
    big.tags = (0..200).map(|i| format!("tag-number-{i:04}")).collect();
    store.save(&[big.clone()]).unwrap();

    let fetched: Option<User> = store.fetch(&[Value::from("u1")]).unwrap();
    assert_eq!(fetched, Some(big));

    // deleting the record deletes its chunks
    store.delete_by_id::<User>(&[Value::from("u1")]).unwrap();
    let leftovers: Vec<_> = engine
        .with_transaction::<_, StoreError, _>(&TransactionConfig::default(), |tx| {
            let (begin, end) = default_blob_region().range();
            Ok(tx.get_range(RangeScan::new(begin, end))?)
        })
        .unwrap();
    assert!(leftovers.is_empty());
}

#[test]
fn test_execute_batch_is_atomic() {
    let store = open_store();
    store.save(&[user("u1", "taken@example.com")]).unwrap();

    // one conflicting insert poisons the whole batch
    let result = store.execute_batch(
        &[user("u2", "taken@example.com"), user("u3", "free@example.com")],
        &[vec![Value::from("u1")]],
    );
    assert!(matches!(result, Err(StoreError::UniquenessViolation { .. })));

    assert_eq!(store.fetch::<User>(&[Value::from("u2")]).unwrap(), None);
    assert_eq!(store.fetch::<User>(&[Value::from("u3")]).unwrap(), None);
    assert!(store.fetch::<User>(&[Value::from("u1")]).unwrap().is_some());
}

#[test]
fn test_execute_batch_applies_inserts_and_deletes() {
    let store = open_store();
    store.save(&[user("u1", "a@example.com")]).unwrap();

    store
        .execute_batch(
            &[user("u2", "b@example.com")],
            &[vec![Value::from("u1")]],
        )
        .unwrap();

    assert_eq!(store.fetch::<User>(&[Value::from("u1")]).unwrap(), None);
    assert!(store.fetch::<User>(&[Value::from("u2")]).unwrap().is_some());
}

#[test]
fn test_clear_all_drops_records_and_indexes() {
    let store = open_store();
    store.save(&[user("u1", "a@example.com"), user("u2", "b@example.com")]).unwrap();

    store.clear_all::<User>().unwrap();

    assert!(store.fetch_all::<User>().unwrap().is_empty());
    assert!(store
        .scan_index::<User>("user_email", &[Value::from("a@example.com")])
        .unwrap()
        .is_empty());
    assert_eq!(
        store.count_for::<User>("user_count_by_region", &[Value::from("US")]).unwrap(),
        0
    );
}

#[test]
fn test_with_transaction_spans_operations_atomically() {
    let store = open_store();
    store
        .with_transaction(&TransactionConfig::default(), |view| {
            view.save(&user("u1", "a@example.com"))?;
            view.save(&user("u2", "b@example.com"))?;
            // both are visible inside the open transaction
            assert!(view.fetch::<User>(&[Value::from("u1")])?.is_some());
            Ok(())
        })
        .unwrap();
    assert_eq!(store.fetch_all::<User>().unwrap().len(), 2);
}

#[test]
fn test_estimated_record_count_tracks_growth() {
    let store = open_store();
    assert_eq!(store.estimated_record_count::<User>().unwrap(), 0);

    let users: Vec<User> = (0..100)
        .map(|i| user(&format!("u{i:03}"), &format!("u{i}@example.com")))
        .collect();
    store.save(&users).unwrap();

    assert!(store.estimated_record_count::<User>().unwrap() > 0);
}

// ============ delegate wiring ============

struct DenyWrites;

impl SecurityDelegate for DenyWrites {
    fn evaluate_list(
        &self,
        _record_type: &'static str,
        _limit: Option<usize>,
        _offset: usize,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    fn evaluate_get(&self, _record_type: &'static str, _pk: &[Value]) -> Result<(), StoreError> {
        Ok(())
    }

    fn evaluate_create(&self, record_type: &'static str, _pk: &[Value]) -> Result<(), StoreError> {
        Err(StoreError::SecurityDenied(format!(
            "creates forbidden on {record_type}"
        )))
    }

    fn evaluate_update(&self, _record_type: &'static str, _pk: &[Value]) -> Result<(), StoreError> {
        Ok(())
    }

    fn evaluate_delete(&self, _record_type: &'static str, _pk: &[Value]) -> Result<(), StoreError> {
        Ok(())
    }

    fn require_admin(
        &self,
        _operation: AdminOperation,
        record_type: &'static str,
    ) -> Result<(), StoreError> {
        Err(StoreError::SecurityDenied(format!(
            "not an admin for {record_type}"
        )))
    }
}

#[test]
fn test_security_denial_propagates_unmodified() {
    let store = RecordStore::new(MemKv::new()).with_security(Arc::new(DenyWrites));

    let result = store.save(&[user("u1", "a@example.com")]);
    assert!(matches!(result, Err(StoreError::SecurityDenied(_))));
    assert!(store.fetch_all::<User>().unwrap().is_empty());

    assert!(matches!(
        store.clear_all::<User>(),
        Err(StoreError::SecurityDenied(_))
    ));
}

#[derive(Default)]
struct CountingMetrics {
    fetches: AtomicUsize,
    saves: AtomicUsize,
    failures: AtomicUsize,
}

impl MetricsDelegate for CountingMetrics {
    fn did_fetch(&self, _record_type: &'static str, _count: usize, _elapsed: Duration) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }
    fn did_save(&self, _record_type: &'static str, _count: usize, _elapsed: Duration) {
        self.saves.fetch_add(1, Ordering::Relaxed);
    }
    fn did_delete(&self, _record_type: &'static str, _count: usize, _elapsed: Duration) {}
    fn did_batch(&self, _record_type: &'static str, _count: usize, _elapsed: Duration) {}
    fn did_fail_fetch(&self, _record_type: &'static str, _elapsed: Duration) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }
    fn did_fail_save(&self, _record_type: &'static str, _elapsed: Duration) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }
    fn did_fail_delete(&self, _record_type: &'static str, _elapsed: Duration) {}
    fn did_fail_batch(&self, _record_type: &'static str, _elapsed: Duration) {}
}

#[test]
fn test_metrics_report_outcomes() {
    let metrics = Arc::new(CountingMetrics::default());
    let store = RecordStore::new(MemKv::new()).with_metrics(metrics.clone());

    store.save(&[user("u1", "a@example.com")]).unwrap();
    store.fetch_all::<User>().unwrap();

    // duplicate email fails and is reported as a failure
    let _ = store.save(&[user("u2", "a@example.com")]);

    assert_eq!(metrics.saves.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.fetches.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.failures.load(Ordering::Relaxed), 1);
}

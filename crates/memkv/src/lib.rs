//! In-memory KV engine implementing the lodestone contract.
//!
//! Values are version-stamped so every transaction reads a consistent
//! snapshot; writes are buffered and validated optimistically at commit by
//! checking the read set against commits newer than the snapshot. Conflicts
//! surface as [`KvError::Conflict`] and are retried by `with_transaction`.
//!
//! The engine is the reference implementation used by the test suites; it
//! favors obviousness over throughput.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::trace;

use lodestone_core::kv::{
    Key, KeyValue, KvEngine, KvError, KvTransaction, MaybeRetryable, RangeScan, TransactionConfig,
    TransactionOption,
};

/// Commit records retained for conflict checks. A transaction whose snapshot
/// predates the retained window conflicts conservatively.
const HISTORY_LIMIT: usize = 4096;

/// Retries performed by `with_transaction` when the config sets no limit.
const DEFAULT_RETRY_LIMIT: u32 = 100;

type Versioned = Vec<(u64, Option<Arc<Vec<u8>>>)>;

#[derive(Default)]
struct CommitRecord {
    version: u64,
    points: Vec<Key>,
    ranges: Vec<(Key, Key)>,
}

#[derive(Default)]
struct EngineState {
    map: BTreeMap<Key, Versioned>,
    version: u64,
    history: VecDeque<CommitRecord>,
    oldest_checked: u64,
}

impl EngineState {
    fn read_at(&self, key: &[u8], snapshot: u64) -> Option<Arc<Vec<u8>>> {
        let versions = self.map.get(key)?;
        versions
            .iter()
            .rev()
            .find(|(version, _)| *version <= snapshot)
            .and_then(|(_, value)| value.clone())
    }

    fn latest(&self, key: &[u8]) -> Option<Arc<Vec<u8>>> {
        self.map
            .get(key)
            .and_then(|versions| versions.last())
            .and_then(|(_, value)| value.clone())
    }

    fn push_version(&mut self, key: &[u8], version: u64, value: Option<Arc<Vec<u8>>>) {
        self.map.entry(key.to_vec()).or_default().push((version, value));
    }
}

/// Shared engine handle, cheap to clone.
#[derive(Clone, Default)]
pub struct MemKv {
    state: Arc<Mutex<EngineState>>,
}

impl MemKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn begin(&self) -> MemTransaction {
        let snapshot = self.state.lock().expect("engine lock").version;
        MemTransaction {
            state: Arc::clone(&self.state),
            snapshot,
            writes: BTreeMap::new(),
            cleared: Vec::new(),
            read_points: Vec::new(),
            read_ranges: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
enum Buffered {
    Set(Vec<u8>),
    Clear,
    Add(i64),
}

pub struct MemTransaction {
    state: Arc<Mutex<EngineState>>,
    snapshot: u64,
    writes: BTreeMap<Key, Buffered>,
    cleared: Vec<(Key, Key)>,
    read_points: Vec<Key>,
    read_ranges: Vec<(Key, Key)>,
}

fn le_value(value: i64) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

/// Interpret stored bytes as a little-endian i64: missing counts as zero,
/// short values are zero-extended, long values read their first 8 bytes.
fn le_decode(bytes: Option<&[u8]>) -> i64 {
    let mut raw = [0u8; 8];
    if let Some(bytes) = bytes {
        let len = bytes.len().min(8);
        raw[..len].copy_from_slice(&bytes[..len]);
    }
    i64::from_le_bytes(raw)
}

fn in_range(key: &[u8], begin: &[u8], end: &[u8]) -> bool {
    key >= begin && key < end
}

fn ranges_overlap(a: &(Key, Key), b: &(Key, Key)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

impl MemTransaction {
    fn masked(&self, key: &[u8]) -> bool {
        self.cleared
            .iter()
            .any(|(begin, end)| in_range(key, begin, end))
    }

    fn snapshot_get(&mut self, key: &[u8], track: bool) -> Option<Vec<u8>> {
        if self.masked(key) {
            return None;
        }
        if track {
            self.read_points.push(key.to_vec());
        }
        let state = self.state.lock().expect("engine lock");
        state.read_at(key, self.snapshot).map(|value| (*value).clone())
    }

    fn commit(self) -> Result<(), KvError> {
        let mut state = self.state.lock().expect("engine lock");

        if self.snapshot < state.oldest_checked {
            trace!(snapshot = self.snapshot, "snapshot older than retained history");
            return Err(KvError::Conflict);
        }

        for commit in state.history.iter().rev() {
            if commit.version <= self.snapshot {
                break;
            }
            if self.conflicts_with(commit) {
                trace!(version = commit.version, "commit conflict detected");
                return Err(KvError::Conflict);
            }
        }

        if self.writes.is_empty() && self.cleared.is_empty() {
            return Ok(());
        }

        state.version += 1;
        let version = state.version;

        for (begin, end) in &self.cleared {
            let live: Vec<Key> = state
                .map
                .range(begin.clone()..end.clone())
                .filter(|(key, _)| !self.writes.contains_key(*key))
                .filter(|(_, versions)| matches!(versions.last(), Some((_, Some(_)))))
                .map(|(key, _)| key.clone())
                .collect();
            for key in live {
                state.push_version(&key, version, None);
            }
        }

        for (key, buffered) in &self.writes {
            match buffered {
                Buffered::Set(value) => {
                    state.push_version(key, version, Some(Arc::new(value.clone())))
                }
                Buffered::Clear => state.push_version(key, version, None),
                Buffered::Add(delta) => {
                    let base = state.latest(key);
                    let sum = le_decode(base.as_deref().map(|v| v.as_slice())).wrapping_add(*delta);
                    state.push_version(key, version, Some(Arc::new(le_value(sum))));
                }
            }
        }

        let record = CommitRecord {
            version,
            points: self.writes.keys().cloned().collect(),
            ranges: self.cleared.clone(),
        };
        state.history.push_back(record);
        while state.history.len() > HISTORY_LIMIT {
            if let Some(dropped) = state.history.pop_front() {
                state.oldest_checked = dropped.version;
            }
        }

        trace!(version, writes = self.writes.len(), "committed");
        Ok(())
    }

    fn conflicts_with(&self, commit: &CommitRecord) -> bool {
        for point in &commit.points {
            if self.read_points.iter().any(|read| read == point) {
                return true;
            }
            if self
                .read_ranges
                .iter()
                .any(|(begin, end)| in_range(point, begin, end))
            {
                return true;
            }
        }
        for range in &commit.ranges {
            if self
                .read_points
                .iter()
                .any(|read| in_range(read, &range.0, &range.1))
            {
                return true;
            }
            if self.read_ranges.iter().any(|read| ranges_overlap(read, range)) {
                return true;
            }
        }
        false
    }
}

impl KvTransaction for MemTransaction {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        match self.writes.get(key).cloned() {
            Some(Buffered::Set(value)) => Ok(Some(value)),
            Some(Buffered::Clear) => Ok(None),
            Some(Buffered::Add(delta)) => {
                let base = self.snapshot_get(key, true);
                let sum = le_decode(base.as_deref()).wrapping_add(delta);
                Ok(Some(le_value(sum)))
            }
            None => Ok(self.snapshot_get(key, true)),
        }
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.writes.insert(key.to_vec(), Buffered::Set(value.to_vec()));
    }

    fn clear(&mut self, key: &[u8]) {
        self.writes.insert(key.to_vec(), Buffered::Clear);
    }

    fn clear_range(&mut self, begin: &[u8], end: &[u8]) {
        if begin >= end {
            return;
        }
        let buffered: Vec<Key> = self
            .writes
            .range(begin.to_vec()..end.to_vec())
            .map(|(key, _)| key.clone())
            .collect();
        for key in buffered {
            self.writes.insert(key, Buffered::Clear);
        }
        self.cleared.push((begin.to_vec(), end.to_vec()));
    }

    fn atomic_add(&mut self, key: &[u8], delta: i64) {
        let next = match self.writes.get(key) {
            Some(Buffered::Set(value)) => {
                Buffered::Set(le_value(le_decode(Some(value)).wrapping_add(delta)))
            }
            Some(Buffered::Clear) => Buffered::Set(le_value(delta)),
            Some(Buffered::Add(prior)) => Buffered::Add(prior.wrapping_add(delta)),
            None => Buffered::Add(delta),
        };
        self.writes.insert(key.to_vec(), next);
    }

    fn get_range(&mut self, scan: RangeScan) -> Result<Vec<KeyValue>, KvError> {
        if scan.begin >= scan.end {
            return Ok(Vec::new());
        }

        let mut merged: BTreeMap<Key, Vec<u8>> = BTreeMap::new();
        {
            let state = self.state.lock().expect("engine lock");
            for (key, _) in state.map.range(scan.begin.clone()..scan.end.clone()) {
                if self.masked(key) {
                    continue;
                }
                if let Some(value) = state.read_at(key, self.snapshot) {
                    merged.insert(key.clone(), (*value).clone());
                }
            }
        }

        let buffered: Vec<(Key, Buffered)> = self
            .writes
            .range(scan.begin.clone()..scan.end.clone())
            .map(|(key, buffered)| (key.clone(), buffered.clone()))
            .collect();
        for (key, buffered) in buffered {
            match buffered {
                Buffered::Set(value) => {
                    merged.insert(key, value);
                }
                Buffered::Clear => {
                    merged.remove(&key);
                }
                Buffered::Add(delta) => {
                    let base = self.snapshot_get(&key, false);
                    let sum = le_decode(base.as_deref()).wrapping_add(delta);
                    merged.insert(key, le_value(sum));
                }
            }
        }

        if !scan.snapshot {
            self.read_ranges.push((scan.begin.clone(), scan.end.clone()));
        }

        let mut pairs: Vec<KeyValue> = merged.into_iter().collect();
        if scan.reverse {
            pairs.reverse();
        }
        if let Some(limit) = scan.limit {
            pairs.truncate(limit);
        }
        Ok(pairs)
    }

    fn estimated_range_size(&mut self, begin: &[u8], end: &[u8]) -> Result<i64, KvError> {
        if begin >= end {
            return Ok(0);
        }
        let state = self.state.lock().expect("engine lock");
        let mut total = 0i64;
        for (key, versions) in state.map.range(begin.to_vec()..end.to_vec()) {
            if let Some((_, Some(value))) = versions.last() {
                total += (key.len() + value.len()) as i64;
            }
        }
        Ok(total)
    }

    fn set_option(&mut self, option: TransactionOption) {
        trace!(?option, "transaction option set");
    }
}

impl KvEngine for MemKv {
    type Tx = MemTransaction;

    fn with_transaction<T, E, F>(&self, config: &TransactionConfig, mut body: F) -> Result<T, E>
    where
        E: From<KvError> + MaybeRetryable,
        F: FnMut(&mut Self::Tx) -> Result<T, E>,
    {
        let started = Instant::now();
        let retry_limit = config.retry_limit.unwrap_or(DEFAULT_RETRY_LIMIT);
        let cancelled = |config: &TransactionConfig| {
            config
                .cancel
                .as_ref()
                .is_some_and(|flag| flag.load(std::sync::atomic::Ordering::Relaxed))
        };
        let mut attempts = 0u32;

        loop {
            if cancelled(config) {
                return Err(E::from(KvError::Cancelled));
            }

            let mut tx = self.begin();
            let outcome = body(&mut tx).and_then(|value| {
                if cancelled(config) {
                    return Err(E::from(KvError::Cancelled));
                }
                tx.commit().map(|_| value).map_err(E::from)
            });

            match outcome {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() => {
                    attempts += 1;
                    if attempts > retry_limit {
                        return Err(error);
                    }
                    if let Some(timeout) = config.timeout {
                        if timed_out(started, timeout) {
                            return Err(E::from(KvError::TimedOut));
                        }
                    }
                    trace!(attempts, "retrying transaction");
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn timed_out(started: Instant, timeout: Duration) -> bool {
    started.elapsed() >= timeout
}

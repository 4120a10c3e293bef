//! Storage behind the session store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

/// One session's data and deadline.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub data: HashMap<String, Value>,
    pub expires_at: Instant,
}

impl SessionRecord {
    pub fn new(expires_at: Instant) -> Self {
        Self {
            data: HashMap::new(),
            expires_at,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Keyed storage for session records.
///
/// Implementations must serialize mutations to a single record while
/// letting distinct tokens proceed in parallel. Every lookup takes the
/// current time; a record past its deadline behaves as if it were absent
/// and may be reclaimed on the spot.
pub trait SessionBackend: Send + Sync {
    fn insert(&self, token: &str, record: SessionRecord);

    /// Whether `token` names a live record. `extend_to` moves its deadline.
    fn resolve(&self, token: &str, now: Instant, extend_to: Option<Instant>) -> Option<Instant>;

    fn get(&self, token: &str, key: &str, now: Instant) -> Option<Value>;

    /// Stores a value; false when the record is gone.
    fn set(&self, token: &str, key: String, value: Value, now: Instant) -> bool;

    fn remove(&self, token: &str, key: &str, now: Instant) -> Option<Value>;

    fn snapshot(&self, token: &str, now: Instant) -> Option<HashMap<String, Value>>;

    /// Removes and returns a live record.
    fn take(&self, token: &str, now: Instant) -> Option<SessionRecord>;

    /// Drops every expired record, returning how many went.
    fn sweep(&self, now: Instant) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process backend: a sharded map with one lock per record.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: DashMap<String, Arc<Mutex<SessionRecord>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self, token: &str, now: Instant) -> Option<Arc<Mutex<SessionRecord>>> {
        // Clone the record out so the shard lock is released before the
        // record lock is taken.
        let record = self.records.get(token).map(|r| Arc::clone(r.value()))?;

        let expired = record.lock().is_expired(now);
        if expired {
            self.records.remove_if(token, |_, r| Arc::ptr_eq(r, &record));
            return None;
        }
        Some(record)
    }
}

impl SessionBackend for MemoryBackend {
    fn insert(&self, token: &str, record: SessionRecord) {
        self.records
            .insert(token.to_string(), Arc::new(Mutex::new(record)));
    }

    fn resolve(&self, token: &str, now: Instant, extend_to: Option<Instant>) -> Option<Instant> {
        let record = self.live(token, now)?;
        let mut record = record.lock();
        if let Some(deadline) = extend_to {
            record.expires_at = deadline;
        }
        Some(record.expires_at)
    }

    fn get(&self, token: &str, key: &str, now: Instant) -> Option<Value> {
        let record = self.live(token, now)?;
        let record = record.lock();
        record.data.get(key).cloned()
    }

    fn set(&self, token: &str, key: String, value: Value, now: Instant) -> bool {
        let Some(record) = self.live(token, now) else {
            return false;
        };
        record.lock().data.insert(key, value);
        true
    }

    fn remove(&self, token: &str, key: &str, now: Instant) -> Option<Value> {
        let record = self.live(token, now)?;
        let mut record = record.lock();
        record.data.remove(key)
    }

    fn snapshot(&self, token: &str, now: Instant) -> Option<HashMap<String, Value>> {
        let record = self.live(token, now)?;
        let record = record.lock();
        Some(record.data.clone())
    }

    fn take(&self, token: &str, now: Instant) -> Option<SessionRecord> {
        let (_, record) = self.records.remove(token)?;
        let record = record.lock().clone();
        (!record.is_expired(now)).then_some(record)
    }

    fn sweep(&self, now: Instant) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| !r.lock().is_expired(now));
        before.saturating_sub(self.records.len())
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

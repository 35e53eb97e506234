//! In-process document store
//!
//! Clones share one document set. The store is its own connector, so tests
//! and local runs can hand it to a loader and count how often workers
//! connected.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::{FindQuery, RecordStore, StoreConnector, StoreTarget};
use crate::data::record::Record;
use crate::error::{Result, SlabError};

#[derive(Default)]
struct Shared {
    records: RwLock<Vec<Record>>,
    connections: AtomicUsize,
    queries: AtomicU64,
    failing: AtomicBool,
}

/// Shared in-memory collection
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<Record>) -> Self {
        let store = Self::new();
        *store.shared.records.write() = records;
        store
    }

    pub fn insert(&self, record: Record) {
        self.shared.records.write().push(record);
    }

    pub fn len(&self) -> usize {
        self.shared.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `connect` calls served
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::Relaxed)
    }

    /// Number of queries served
    pub fn queries(&self) -> u64 {
        self.shared.queries.load(Ordering::Relaxed)
    }

    /// Make every following query fail with a storage error
    pub fn set_failing(&self, failing: bool) {
        self.shared.failing.store(failing, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<()> {
        if self.shared.failing.load(Ordering::Relaxed) {
            return Err(SlabError::Storage {
                message: "memory store is unavailable".into(),
            });
        }
        Ok(())
    }
}

impl RecordStore for MemoryStore {
    async fn find(&self, query: &FindQuery) -> Result<Vec<Record>> {
        self.check_available()?;
        self.shared.queries.fetch_add(1, Ordering::Relaxed);

        let matched: Vec<Record> = self
            .shared
            .records
            .read()
            .iter()
            .filter(|r| query.matches(r))
            .map(|r| r.clone().project(&query.projection))
            .collect();
        debug!("memory find {} ids -> {} records", query.ids.len(), matched.len());
        Ok(matched)
    }

    async fn last_by(&self, field: &str) -> Result<Option<Record>> {
        self.check_available()?;
        let records = self.shared.records.read();
        let last = records
            .iter()
            .filter_map(|r| r.get(field).and_then(|f| f.as_key()).map(|k| (k, r)))
            .max_by(|a, b| a.0.cmp(&b.0))
            .map(|(_, r)| r.clone());
        Ok(last)
    }
}

impl StoreConnector for MemoryStore {
    type Store = MemoryStore;

    async fn connect(&self, _target: &StoreTarget, worker_id: usize) -> Result<MemoryStore> {
        self.shared.connections.fetch_add(1, Ordering::Relaxed);
        debug!("Worker {} attached to memory store", worker_id);
        Ok(self.clone())
    }
}

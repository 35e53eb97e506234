//! Document store access
//!
//! The pipeline reads shards through `RecordStore`, a single membership
//! query with a field projection. Each worker gets its own store handle
//! from a `StoreConnector` at startup.

pub mod ejson;
pub mod http;
pub mod memory;

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::data::record::{Key, Record};
use crate::error::Result;

pub use http::{HttpConnector, HttpDocumentStore};
pub use memory::MemoryStore;

/// Membership query: documents whose `id_field` is one of `ids`
#[derive(Debug, Clone, PartialEq)]
pub struct FindQuery {
    pub id_field: String,
    pub ids: Vec<Key>,
    /// Fields to return; empty means all fields
    pub projection: Vec<String>,
}

impl FindQuery {
    /// `{id_field: {"$in": [ids]}}`
    pub fn filter(&self) -> Value {
        let mut filter = Map::new();
        filter.insert(self.id_field.clone(), json!({ "$in": self.ids }));
        Value::Object(filter)
    }

    /// `{field: 1, ...}`, or `{}` for all fields
    pub fn projection_doc(&self) -> Value {
        let fields: Map<String, Value> = self
            .projection
            .iter()
            .map(|f| (f.clone(), json!(1)))
            .collect();
        Value::Object(fields)
    }

    /// True if `record` satisfies the filter
    pub fn matches(&self, record: &Record) -> bool {
        record
            .get(&self.id_field)
            .and_then(|f| f.as_key())
            .map_or(false, |key| self.ids.contains(&key))
    }
}

/// Read access to a collection of shard documents
pub trait RecordStore: Send + Sync + 'static {
    /// Run a membership query. Result order is unspecified.
    fn find(&self, query: &FindQuery) -> impl Future<Output = Result<Vec<Record>>> + Send;

    /// Document with the largest value of `field`, if any
    fn last_by(&self, field: &str) -> impl Future<Output = Result<Option<Record>>> + Send;
}

/// Where the shard collection lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreTarget {
    /// Host name, or a full `http(s)://` base URL
    pub host: String,
    pub port: u16,
    pub database: String,
    pub collection: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for StoreTarget {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8080,
            database: "MindfulTensors".into(),
            collection: "HCP".into(),
            connect_timeout_secs: 10,
            request_timeout_secs: 300,
        }
    }
}

impl StoreTarget {
    /// Base URL of the store's HTTP interface
    pub fn endpoint(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            self.host.trim_end_matches('/').to_string()
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

/// Opens one private store handle per worker
pub trait StoreConnector: Send + Sync + 'static {
    type Store: RecordStore;

    /// Called once by each worker before its first fetch
    fn connect(
        &self,
        target: &StoreTarget,
        worker_id: usize,
    ) -> impl Future<Output = Result<Self::Store>> + Send;
}

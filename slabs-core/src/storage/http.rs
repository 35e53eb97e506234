//! HTTP document store client
//!
//! Talks to a JSON data API exposing `POST {endpoint}/action/find` with a
//! body of `{database, collection, filter, projection}` and a reply of
//! `{"documents": [...]}`. Failures are reported once, never retried.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::ejson::record_from_document;
use super::{FindQuery, RecordStore, StoreConnector, StoreTarget};
use crate::data::record::Record;
use crate::error::{Result, SlabError};

#[derive(Debug, Deserialize)]
struct FindReply {
    documents: Vec<Map<String, Value>>,
}

/// Handle on one collection
pub struct HttpDocumentStore {
    client: Client,
    endpoint: String,
    database: String,
    collection: String,
}

impl HttpDocumentStore {
    /// Build a client for `target`
    pub fn new(target: &StoreTarget) -> Result<Self> {
        let endpoint = target.endpoint();
        let client = Client::builder()
            .timeout(Duration::from_secs(target.request_timeout_secs))
            .connect_timeout(Duration::from_secs(target.connect_timeout_secs))
            .build()
            .map_err(|e| SlabError::ConnectionFailed {
                endpoint: endpoint.clone(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint,
            database: target.database.clone(),
            collection: target.collection.clone(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    async fn post_find(&self, body: Value) -> Result<Vec<Record>> {
        let url = format!("{}/action/find", self.endpoint);

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SlabError::Storage {
                message: format!("find on {}.{} failed: {}", self.database, self.collection, e),
            })?;

        if !resp.status().is_success() {
            return Err(SlabError::Storage {
                message: format!(
                    "find on {}.{} failed: status {}",
                    self.database,
                    self.collection,
                    resp.status()
                ),
            });
        }

        let reply: FindReply = resp.json().await.map_err(|e| SlabError::Storage {
            message: format!("malformed find reply from {}: {}", url, e),
        })?;

        reply
            .documents
            .into_iter()
            .map(record_from_document)
            .collect()
    }
}

impl RecordStore for HttpDocumentStore {
    async fn find(&self, query: &FindQuery) -> Result<Vec<Record>> {
        let body = json!({
            "database": self.database,
            "collection": self.collection,
            "filter": query.filter(),
            "projection": query.projection_doc(),
        });
        let records = self.post_find(body).await?;
        debug!(
            "find {} ids on {}.{} -> {} documents",
            query.ids.len(),
            self.database,
            self.collection,
            records.len()
        );
        Ok(records)
    }

    async fn last_by(&self, field: &str) -> Result<Option<Record>> {
        let mut sort = Map::new();
        sort.insert(field.to_string(), json!(-1));
        let mut projection = Map::new();
        projection.insert(field.to_string(), json!(1));

        let body = json!({
            "database": self.database,
            "collection": self.collection,
            "filter": {},
            "projection": projection,
            "sort": sort,
            "limit": 1,
        });
        Ok(self.post_find(body).await?.into_iter().next())
    }
}

/// Opens an `HttpDocumentStore` per worker
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpConnector;

impl StoreConnector for HttpConnector {
    type Store = HttpDocumentStore;

    async fn connect(&self, target: &StoreTarget, worker_id: usize) -> Result<HttpDocumentStore> {
        let store = HttpDocumentStore::new(target)?;
        info!(
            "Worker {} connected to {}/{}.{}",
            worker_id,
            target.endpoint(),
            target.database,
            target.collection
        );
        Ok(store)
    }
}

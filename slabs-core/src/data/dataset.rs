//! Dataset of subjects held in a document store
//!
//! Dataset-relative indices map onto external ID values. A batch of
//! indices becomes one membership query returning every shard of the
//! selected subjects.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::record::{Key, Record};
use crate::error::{Result, SlabError};
use crate::storage::{FindQuery, RecordStore};

/// Query configuration for a dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Field the external IDs are matched against
    pub id_field: String,
    /// Fields to fetch per document; empty fetches everything
    pub projection: Vec<String>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            id_field: "subject".into(),
            projection: Vec::new(),
        }
    }
}

/// Indexable view over a set of external IDs
#[derive(Debug, Clone)]
pub struct SlabDataset {
    ids: Vec<Key>,
    config: DatasetConfig,
}

impl SlabDataset {
    pub fn new(ids: Vec<Key>, config: DatasetConfig) -> Self {
        Self { ids, config }
    }

    /// Dataset over consecutive integer IDs
    pub fn from_range(range: Range<i64>, config: DatasetConfig) -> Self {
        Self::new(range.map(Key::Int).collect(), config)
    }

    /// Count subjects as one past the largest integer ID in the store
    pub async fn discover_len<S: RecordStore>(store: &S, id_field: &str) -> Result<usize> {
        let last = match store.last_by(id_field).await? {
            Some(record) => record,
            None => return Ok(0),
        };
        match last.get(id_field).and_then(|f| f.as_key()) {
            Some(Key::Int(max)) if max >= 0 => Ok(max as usize + 1),
            other => Err(SlabError::Storage {
                message: format!("cannot count subjects from '{}' = {:?}", id_field, other),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[Key] {
        &self.ids
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    /// Split off the trailing `fraction` of IDs as a hold-out set
    pub fn split_holdout(self, fraction: f64) -> Result<(Self, Self)> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(SlabError::invalid_config(format!(
                "hold-out fraction {} is outside [0, 1]",
                fraction
            )));
        }
        let keep = ((1.0 - fraction) * self.ids.len() as f64).floor() as usize;
        let mut train = self.ids;
        let holdout = train.split_off(keep);
        Ok((
            Self::new(train, self.config.clone()),
            Self::new(holdout, self.config),
        ))
    }

    /// Translate dataset indices into a membership query
    pub fn query_for(&self, batch: &[usize]) -> Result<FindQuery> {
        let ids = batch
            .iter()
            .map(|&index| {
                self.ids.get(index).cloned().ok_or(SlabError::IndexOutOfRange {
                    index,
                    len: self.ids.len(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(FindQuery {
            id_field: self.config.id_field.clone(),
            ids,
            projection: self.config.projection.clone(),
        })
    }

    /// Fetch every record of the subjects at `batch`
    pub async fn fetch<S: RecordStore>(&self, store: &S, batch: &[usize]) -> Result<Vec<Record>> {
        let query = self.query_for(batch)?;
        let records = store.find(&query).await?;
        debug!("Fetched {} records for {} subjects", records.len(), batch.len());
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn dataset() -> SlabDataset {
        SlabDataset::from_range(
            100..110,
            DatasetConfig {
                id_field: "subject".into(),
                projection: vec!["subject".into(), "id".into()],
            },
        )
    }

    #[test]
    fn test_query_translates_indices() {
        let query = dataset().query_for(&[3, 0]).unwrap();
        assert_eq!(query.ids, vec![Key::Int(103), Key::Int(100)]);
        assert_eq!(query.id_field, "subject");
        assert_eq!(query.projection.len(), 2);
    }

    #[test]
    fn test_index_out_of_range() {
        let err = dataset().query_for(&[1, 10]).unwrap_err();
        assert!(matches!(err, SlabError::IndexOutOfRange { index: 10, len: 10 }));
    }

    #[test]
    fn test_split_holdout() {
        let (train, holdout) = dataset().split_holdout(0.1).unwrap();
        assert_eq!(train.len(), 9);
        assert_eq!(holdout.ids(), &[Key::Int(109)]);
        assert!(dataset().split_holdout(1.5).is_err());
    }

    #[tokio::test]
    async fn test_fetch_and_discover() {
        let store = MemoryStore::new();
        for subject in 0..4i64 {
            for id in 0..2i64 {
                store.insert(Record::new().with("subject", subject).with("id", id).with("x", 1i64));
            }
        }

        let n = SlabDataset::discover_len(&store, "subject").await.unwrap();
        assert_eq!(n, 4);

        let ds = SlabDataset::from_range(0..n as i64, DatasetConfig::default());
        let records = ds.fetch(&store, &[1, 3]).await.unwrap();
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.contains("x")));
    }
}

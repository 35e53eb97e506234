//! Loader configuration
//!
//! Every section has defaults matching the usual layout of a slab
//! collection: 256-voxel cubes split into slabs along the first axis,
//! `subdata`/`sublabel` payloads, subjects keyed by `subject`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::assembler::AssemblyConfig;
use crate::data::collate::CollateMode;
use crate::data::dataset::{DatasetConfig, SlabDataset};
use crate::data::record::FieldNames;
use crate::error::{Result, SlabError};
use crate::runtime::RuntimeConfig;
use crate::storage::StoreTarget;

/// Crop sampling configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub mode: CollateMode,
    /// Crop shape used in subvolume mode
    pub crop_shape: [usize; 3],
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            mode: CollateMode::default(),
            crop_shape: [crate::DEFAULT_CROP_SIZE; 3],
        }
    }
}

/// Full configuration of a data loader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub store: StoreTarget,
    pub dataset: DatasetConfig,
    pub fields: FieldNames,
    pub assembly: AssemblyConfig,
    pub sampling: SamplingConfig,
    pub runtime: RuntimeConfig,
    /// Subjects per batch
    pub batch_size: usize,
    /// Worker tasks, each with its own store connection
    pub num_workers: usize,
    /// Finished batches each worker may hold ahead of the consumer
    pub prefetch_depth: usize,
    /// Seed for the index permutation and crop placement
    pub seed: u64,
    /// Trailing share of subjects held out from training
    pub holdout_fraction: f64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            store: StoreTarget::default(),
            dataset: DatasetConfig::default(),
            fields: FieldNames::default(),
            assembly: AssemblyConfig::default(),
            sampling: SamplingConfig::default(),
            runtime: RuntimeConfig::default(),
            batch_size: 1,
            num_workers: 1,
            prefetch_depth: crate::DEFAULT_PREFETCH_DEPTH,
            seed: 0,
            holdout_fraction: crate::DEFAULT_HOLDOUT_FRACTION,
        }
    }
}

impl LoaderConfig {
    /// Read a JSON configuration file; missing keys take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| SlabError::ConfigLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| SlabError::ConfigLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Apply `SLABS_*` environment overrides
    pub fn apply_env(mut self) -> Result<Self> {
        self.apply_vars(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = var("SLABS_HOST") {
            self.store.host = host;
        }
        if let Some(database) = var("SLABS_DATABASE") {
            self.store.database = database;
        }
        if let Some(collection) = var("SLABS_COLLECTION") {
            self.store.collection = collection;
        }
        if let Some(v) = var("SLABS_BATCH_SIZE") {
            self.batch_size = parse_var("SLABS_BATCH_SIZE", &v)?;
        }
        if let Some(v) = var("SLABS_WORKERS") {
            self.num_workers = parse_var("SLABS_WORKERS", &v)?;
        }
        if let Some(v) = var("SLABS_SEED") {
            self.seed = parse_var("SLABS_SEED", &v)?;
        }
        Ok(())
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SlabError::invalid_config("batch_size must be non-zero"));
        }
        if self.num_workers == 0 {
            return Err(SlabError::invalid_config("num_workers must be non-zero"));
        }
        if self.prefetch_depth == 0 {
            return Err(SlabError::invalid_config("prefetch_depth must be non-zero"));
        }
        if !(0.0..1.0).contains(&self.holdout_fraction) {
            return Err(SlabError::invalid_config(format!(
                "holdout_fraction {} is outside [0, 1)",
                self.holdout_fraction
            )));
        }
        if !self.dataset.projection.is_empty() {
            let required = [
                &self.fields.subject,
                &self.fields.shard,
                &self.fields.data,
                &self.fields.label,
            ];
            if let Some(missing) = required
                .into_iter()
                .find(|name| !self.dataset.projection.contains(*name))
            {
                return Err(SlabError::invalid_config(format!(
                    "dataset.projection leaves out field '{}'",
                    missing
                )));
            }
        }
        if self.assembly.cube_size == 0 {
            return Err(SlabError::invalid_config("assembly.cube_size must be non-zero"));
        }
        if let CollateMode::Subvolumes { samples } = self.sampling.mode {
            if samples == 0 {
                return Err(SlabError::invalid_config("sampling.mode.samples must be non-zero"));
            }
            let side = self.assembly.cube_size;
            if self.sampling.crop_shape.iter().any(|&c| c == 0 || c > side) {
                return Err(SlabError::invalid_config(format!(
                    "sampling.crop_shape {:?} does not fit a {}-cube",
                    self.sampling.crop_shape, side
                )));
            }
        }
        Ok(())
    }

    /// Split `dataset` into training and hold-out subjects by `holdout_fraction`
    pub fn split_dataset(&self, dataset: SlabDataset) -> Result<(SlabDataset, SlabDataset)> {
        dataset.split_holdout(self.holdout_fraction)
    }

    /// Shape of the reconstructed volume
    pub fn volume_shape(&self) -> [usize; 3] {
        [self.assembly.cube_size; 3]
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| SlabError::ConfigLoad {
        path: format!("${}", key),
        reason: format!("'{}': {}", value, e),
    })
}

//! Slabs Core - volumetric training batches from sharded records
//!
//! This crate reconstructs 3D volumes stored as slab-shaped shards in a
//! document store and serves them as training batches:
//! - Seeded per-epoch index sampling
//! - Membership queries against an HTTP document store, one connection per worker
//! - `.npy` payload decoding and volume reconstruction
//! - Aligned random crops of data and label volumes
//! - Ordered multi-worker prefetching

pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod runtime;
pub mod storage;

pub use config::{LoaderConfig, SamplingConfig};
pub use data::{CollateMode, DataLoader, SlabDataset, TensorBatch};
pub use error::{Result, SlabError};
pub use runtime::LoaderRuntime;

/// Default edge length of a reconstructed volume
pub const DEFAULT_CUBE_SIZE: usize = 256;

/// Default edge length of a crop
pub const DEFAULT_CROP_SIZE: usize = 64;

/// Default crops drawn per subject
pub const DEFAULT_SAMPLES: usize = 4;

/// Default share of subjects held out from training
pub const DEFAULT_HOLDOUT_FRACTION: f64 = 0.1;

/// Default finished batches buffered per worker
pub const DEFAULT_PREFETCH_DEPTH: usize = 4;

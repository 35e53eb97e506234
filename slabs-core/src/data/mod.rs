//! Data loading pipeline
//!
//! Index sampling, record fetching and decoding, volume reconstruction and
//! aligned crop sampling, driven by a multi-worker loader.

pub mod assembler;
pub mod batch;
pub mod codec;
pub mod collate;
pub mod coords;
pub mod dataset;
pub mod loader;
pub mod record;
pub mod sampler;
pub mod subvolume;

pub use assembler::{AssemblyConfig, DegeneratePolicy, SubjectVolume, VolumeAssembler};
pub use batch::TensorBatch;
pub use codec::RecordDecoder;
pub use collate::{CollateMode, Collator};
pub use coords::{CoordinateGenerator, CropCoords, FixedCoords, UniformCoordsGenerator};
pub use dataset::{DatasetConfig, SlabDataset};
pub use loader::DataLoader;
pub use record::{Field, FieldNames, Key, Record, SubRecord};
pub use sampler::IndexSampler;
pub use subvolume::SubvolumeSampler;

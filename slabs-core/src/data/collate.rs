//! Batch collation
//!
//! Turns the raw records of one fetched batch into a `TensorBatch`:
//! decode payloads, narrow to shards, reconstruct volumes, then either
//! stack whole volumes or cut aligned crops.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::assembler::{AssemblyConfig, VolumeAssembler};
use super::batch::TensorBatch;
use super::codec::RecordDecoder;
use super::coords::CoordinateGenerator;
use super::record::{FieldNames, Record, SubRecord};
use super::subvolume::SubvolumeSampler;
use crate::error::Result;

/// Shape of the batches a loader produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CollateMode {
    /// One slot per subject holding the full cube
    WholeVolume,
    /// `samples` aligned crops per subject
    Subvolumes { samples: usize },
}

impl Default for CollateMode {
    fn default() -> Self {
        CollateMode::Subvolumes {
            samples: crate::DEFAULT_SAMPLES,
        }
    }
}

enum Stage {
    WholeVolume,
    Subvolumes {
        sampler: SubvolumeSampler,
        generator: Box<dyn CoordinateGenerator + Send>,
    },
}

/// Per-worker collation state
pub struct Collator {
    decoder: RecordDecoder,
    names: FieldNames,
    assembler: VolumeAssembler,
    stage: Stage,
}

impl Collator {
    /// Collator producing whole volumes
    pub fn whole_volume(names: FieldNames, assembly: AssemblyConfig) -> Result<Self> {
        Ok(Self {
            decoder: RecordDecoder::from_names(&names),
            assembler: VolumeAssembler::new(assembly)?,
            names,
            stage: Stage::WholeVolume,
        })
    }

    /// Collator producing `samples` crops per subject from `generator`
    pub fn subvolumes(
        names: FieldNames,
        assembly: AssemblyConfig,
        samples: usize,
        generator: Box<dyn CoordinateGenerator + Send>,
    ) -> Result<Self> {
        Ok(Self {
            decoder: RecordDecoder::from_names(&names),
            assembler: VolumeAssembler::new(assembly)?,
            names,
            stage: Stage::Subvolumes {
                sampler: SubvolumeSampler::new(samples)?,
                generator,
            },
        })
    }

    /// Collate the raw records of one batch
    pub fn collate(&mut self, records: Vec<Record>) -> Result<TensorBatch> {
        let decoded = self.decoder.decode_all(records)?;
        let shards = decoded
            .into_iter()
            .map(|r| SubRecord::from_record(r, &self.names))
            .collect::<Result<Vec<_>>>()?;
        let num_shards = shards.len();
        let volumes = self.assembler.assemble(shards)?;

        let batch = match &mut self.stage {
            Stage::WholeVolume => TensorBatch::from_volumes(&volumes)?,
            Stage::Subvolumes { sampler, generator } => {
                sampler.sample(&volumes, generator.as_mut())?
            }
        };

        debug!(
            "Collated {} shards from {} subjects into {} slots of {:?}",
            num_shards,
            volumes.len(),
            batch.len(),
            batch.spatial_shape()
        );
        Ok(batch)
    }
}

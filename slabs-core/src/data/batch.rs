//! Training batch handed to the consumer

use ndarray::{s, Array4, Array5};

use super::assembler::SubjectVolume;
use super::record::Key;
use crate::error::{Result, SlabError};

/// Channel-first intensities and integer labels sharing a leading dimension
#[derive(Debug, Clone, PartialEq)]
pub struct TensorBatch {
    /// Owning subject of each leading slot
    pub subjects: Vec<Key>,
    /// Shape (n, 1, x, y, z)
    pub data: Array5<f32>,
    /// Shape (n, x, y, z)
    pub labels: Array4<i64>,
}

impl TensorBatch {
    /// Stack whole volumes, one slot per subject
    pub fn from_volumes(volumes: &[SubjectVolume]) -> Result<Self> {
        let first = volumes.first().ok_or(SlabError::EmptyBatch)?;
        let [x, y, z] = first.shape();
        let n = volumes.len();

        let mut data = Array5::<f32>::zeros((n, 1, x, y, z));
        let mut labels = Array4::<i64>::zeros((n, x, y, z));
        for (i, volume) in volumes.iter().enumerate() {
            if volume.shape() != [x, y, z] || volume.labels.dim() != (x, y, z) {
                return Err(SlabError::shape_mismatch(
                    &volume.key,
                    format!("volume shape {:?} differs from batch shape {:?}", volume.shape(), [x, y, z]),
                ));
            }
            data.slice_mut(s![i, 0, .., .., ..]).assign(&volume.data);
            labels.slice_mut(s![i, .., .., ..]).assign(&volume.labels);
        }

        Ok(Self {
            subjects: volumes.iter().map(|v| v.key.clone()).collect(),
            data,
            labels,
        })
    }

    /// Number of leading slots
    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    /// Spatial shape of every slot
    pub fn spatial_shape(&self) -> [usize; 3] {
        let (_, x, y, z) = self.labels.dim();
        [x, y, z]
    }

    /// Distinct subjects in slot order
    pub fn distinct_subjects(&self) -> Vec<&Key> {
        let mut out: Vec<&Key> = Vec::new();
        for key in &self.subjects {
            if out.last() != Some(&key) {
                out.push(key);
            }
        }
        out
    }
}

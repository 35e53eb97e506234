//! Volume reconstruction from shards
//!
//! Shards are grouped by owning subject, ordered by shard key, checked for
//! a gap-free cover of the cube, stacked along the leading axis and the
//! intensity volume is min-max scaled to the unit interval.

use std::collections::HashMap;

use ndarray::{concatenate, Array3, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::record::{Key, SubRecord};
use crate::error::{Result, SlabError};

/// What to do with a volume whose intensities are all equal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegeneratePolicy {
    /// Fail the batch
    #[default]
    Reject,
    /// Replace the volume with zeros
    Zero,
}

/// Assembly configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    /// Edge length of the reconstructed cube
    pub cube_size: usize,
    /// Exact shard count per subject, if known
    pub shards_per_subject: Option<usize>,
    /// Handling of zero-range volumes
    pub degenerate: DegeneratePolicy,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            cube_size: crate::DEFAULT_CUBE_SIZE,
            shards_per_subject: None,
            degenerate: DegeneratePolicy::Reject,
        }
    }
}

/// Shards of one subject, in arrival order
#[derive(Debug, Clone)]
pub struct SubjectShards {
    pub subject: Key,
    pub shards: Vec<SubRecord>,
}

/// Reconstructed volumes of one subject
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectVolume {
    pub key: Key,
    /// Normalized intensities
    pub data: Array3<f32>,
    pub labels: Array3<i64>,
}

impl SubjectVolume {
    pub fn shape(&self) -> [usize; 3] {
        let (x, y, z) = self.data.dim();
        [x, y, z]
    }
}

/// Partition shards by subject
///
/// Subjects come out in the order they were first seen. That order fixes
/// the output slot of every subject in the batch.
pub fn group_by_subject(records: Vec<SubRecord>) -> Vec<SubjectShards> {
    let mut groups: Vec<SubjectShards> = Vec::new();
    let mut slot: HashMap<Key, usize> = HashMap::new();

    for record in records {
        match slot.get(&record.subject) {
            Some(&idx) => groups[idx].shards.push(record),
            None => {
                slot.insert(record.subject.clone(), groups.len());
                groups.push(SubjectShards {
                    subject: record.subject.clone(),
                    shards: vec![record],
                });
            }
        }
    }

    groups
}

/// Min-max scale a volume to `[0, 1]` in place
///
/// A volume holding NaN or infinite voxels is rejected under either policy.
pub fn normalize(volume: &mut Array3<f32>, subject: &Key, policy: DegeneratePolicy) -> Result<()> {
    if let Some(&bad) = volume.iter().find(|v| !v.is_finite()) {
        return Err(SlabError::DegenerateVolume {
            subject: subject.to_string(),
            min: bad,
            max: bad,
        });
    }

    let (min, max) = volume
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;

    if !(range.is_finite() && range > 0.0) {
        return match policy {
            DegeneratePolicy::Reject => Err(SlabError::DegenerateVolume {
                subject: subject.to_string(),
                min,
                max,
            }),
            DegeneratePolicy::Zero => {
                debug!("Subject {} has no dynamic range, zeroing", subject);
                volume.fill(0.0);
                Ok(())
            }
        };
    }

    volume.mapv_inplace(|v| (v - min) / range);
    Ok(())
}

/// Builds per-subject volumes from decoded shards
#[derive(Debug, Clone)]
pub struct VolumeAssembler {
    config: AssemblyConfig,
}

impl VolumeAssembler {
    pub fn new(config: AssemblyConfig) -> Result<Self> {
        if config.cube_size == 0 {
            return Err(SlabError::invalid_config("cube size must be non-zero"));
        }
        if config.shards_per_subject == Some(0) {
            return Err(SlabError::invalid_config("shards per subject must be non-zero"));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &AssemblyConfig {
        &self.config
    }

    /// Group, reconstruct and normalize every subject of a batch
    pub fn assemble(&self, records: Vec<SubRecord>) -> Result<Vec<SubjectVolume>> {
        if records.is_empty() {
            return Err(SlabError::EmptyBatch);
        }
        let groups = group_by_subject(records);
        debug!("Assembling {} subjects", groups.len());
        groups.into_iter().map(|g| self.reconstruct(g)).collect()
    }

    /// Stack one subject's shards into its data and label volumes
    pub fn reconstruct(&self, group: SubjectShards) -> Result<SubjectVolume> {
        let SubjectShards { subject, mut shards } = group;
        shards.sort_by(|a, b| a.shard.cmp(&b.shard));
        self.validate(&subject, &shards)?;

        let data_views: Vec<ArrayView3<f32>> = shards.iter().map(|s| s.data.view()).collect();
        let mut data = concatenate(Axis(0), &data_views)
            .map_err(|e| SlabError::shape_mismatch(&subject, e.to_string()))?;
        let label_views: Vec<ArrayView3<i64>> = shards.iter().map(|s| s.label.view()).collect();
        let labels = concatenate(Axis(0), &label_views)
            .map_err(|e| SlabError::shape_mismatch(&subject, e.to_string()))?;

        normalize(&mut data, &subject, self.config.degenerate)?;

        Ok(SubjectVolume {
            key: subject,
            data,
            labels,
        })
    }

    /// Shards must be sorted by shard key
    fn validate(&self, subject: &Key, shards: &[SubRecord]) -> Result<()> {
        let side = self.config.cube_size;

        if let Some(expected) = self.config.shards_per_subject {
            if shards.len() != expected {
                return Err(SlabError::shape_mismatch(
                    subject,
                    format!("expected {} shards, found {}", expected, shards.len()),
                ));
            }
        }

        if let Some(pair) = shards.windows(2).find(|w| w[0].shard == w[1].shard) {
            return Err(SlabError::shape_mismatch(
                subject,
                format!("duplicate shard key {}", pair[0].shard),
            ));
        }

        let mut offset = 0usize;
        for shard in shards {
            let (depth, rows, cols) = shard.data.dim();
            if shard.label.dim() != shard.data.dim() {
                return Err(SlabError::shape_mismatch(
                    subject,
                    format!(
                        "shard {}: data shape {:?} differs from label shape {:?}",
                        shard.shard,
                        shard.data.dim(),
                        shard.label.dim()
                    ),
                ));
            }
            if depth == 0 || rows != side || cols != side {
                return Err(SlabError::shape_mismatch(
                    subject,
                    format!(
                        "shard {}: shape {:?} is not a slab of a {}-cube",
                        shard.shard,
                        shard.data.dim(),
                        side
                    ),
                ));
            }
            if let Some(at) = shard.placement {
                if at != [offset, 0, 0] {
                    return Err(SlabError::shape_mismatch(
                        subject,
                        format!(
                            "shard {}: placed at {:?} but stacks at depth {}",
                            shard.shard, at, offset
                        ),
                    ));
                }
            }
            offset += depth;
        }

        if offset != side {
            return Err(SlabError::shape_mismatch(
                subject,
                format!("shards cover depth {} of {}", offset, side),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Array};

    fn shard(subject: i64, id: i64, depth: usize, side: usize, base: f32) -> SubRecord {
        SubRecord {
            subject: Key::Int(subject),
            shard: Key::Int(id),
            data: Array::from_shape_fn((depth, side, side), |(x, y, z)| {
                base + (x * side * side + y * side + z) as f32
            }),
            label: Array3::from_elem((depth, side, side), id),
            placement: None,
        }
    }

    fn assembler(side: usize) -> VolumeAssembler {
        VolumeAssembler::new(AssemblyConfig {
            cube_size: side,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_group_preserves_first_seen_order() {
        let records = vec![
            shard(5, 0, 1, 2, 0.0),
            shard(2, 0, 1, 2, 0.0),
            shard(5, 1, 1, 2, 0.0),
            shard(9, 0, 1, 2, 0.0),
            shard(2, 1, 1, 2, 0.0),
        ];
        let groups = group_by_subject(records);
        let order: Vec<Key> = groups.iter().map(|g| g.subject.clone()).collect();
        assert_eq!(order, vec![Key::Int(5), Key::Int(2), Key::Int(9)]);
        assert_eq!(groups[0].shards.len(), 2);
        assert_eq!(groups[2].shards.len(), 1);
    }

    #[test]
    fn test_reconstruct_sorts_by_shard_key() {
        // Shards arrive out of order; labels carry the shard id
        let records = vec![shard(1, 2, 2, 4, 0.0), shard(1, 0, 1, 4, 0.0), shard(1, 1, 1, 4, 0.0)];
        let volumes = assembler(4).assemble(records).unwrap();
        assert_eq!(volumes.len(), 1);

        let labels = &volumes[0].labels;
        assert_eq!(labels.dim(), (4, 4, 4));
        assert!(labels.slice(s![0, .., ..]).iter().all(|&v| v == 0));
        assert!(labels.slice(s![1, .., ..]).iter().all(|&v| v == 1));
        assert!(labels.slice(s![2..4, .., ..]).iter().all(|&v| v == 2));
    }

    #[test]
    fn test_data_is_unit_scaled() {
        let records = vec![shard(1, 0, 2, 4, 10.0), shard(1, 1, 2, 4, 500.0)];
        let volume = &assembler(4).assemble(records).unwrap()[0];
        let min = volume.data.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = volume.data.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        assert_eq!(min, 0.0);
        assert!((max - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_renormalize_is_noop() {
        let mut volume = Array::from_shape_fn((3, 3, 3), |(x, y, z)| (x * 7 + y * 3 + z) as f32 - 4.0);
        normalize(&mut volume, &Key::Int(0), DegeneratePolicy::Reject).unwrap();
        let once = volume.clone();
        normalize(&mut volume, &Key::Int(0), DegeneratePolicy::Reject).unwrap();
        for (a, b) in once.iter().zip(volume.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_degenerate_volume() {
        let mut flat = Array3::from_elem((2, 2, 2), 3.0f32);
        let err = normalize(&mut flat, &Key::Int(4), DegeneratePolicy::Reject).unwrap_err();
        assert!(matches!(err, SlabError::DegenerateVolume { min, max, .. } if min == 3.0 && max == 3.0));

        normalize(&mut flat, &Key::Int(4), DegeneratePolicy::Zero).unwrap();
        assert!(flat.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_non_finite_voxels_rejected() {
        for policy in [DegeneratePolicy::Reject, DegeneratePolicy::Zero] {
            let mut volume = Array3::from_shape_fn((2, 2, 2), |(x, y, z)| (x + y + z) as f32);
            volume[[1, 0, 1]] = f32::NAN;
            let err = normalize(&mut volume, &Key::Int(9), policy).unwrap_err();
            assert!(matches!(err, SlabError::DegenerateVolume { ref subject, .. } if subject == "9"));

            volume[[1, 0, 1]] = f32::INFINITY;
            assert!(normalize(&mut volume, &Key::Int(9), policy).is_err());
        }
    }

    #[test]
    fn test_missing_shard() {
        let records = vec![shard(1, 0, 2, 4, 0.0), shard(1, 2, 1, 4, 0.0)];
        let err = assembler(4).assemble(records).unwrap_err();
        assert!(matches!(err, SlabError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_duplicate_shard() {
        let records = vec![shard(1, 0, 2, 4, 0.0), shard(1, 0, 2, 4, 0.0)];
        let err = assembler(4).assemble(records).unwrap_err();
        assert!(err.to_string().contains("duplicate shard key 0"));
    }

    #[test]
    fn test_wrong_slab_side() {
        let records = vec![shard(1, 0, 2, 4, 0.0), shard(1, 1, 2, 3, 0.0)];
        assert!(assembler(4).assemble(records).is_err());
    }

    #[test]
    fn test_label_shape_must_match_data() {
        let mut bad = shard(1, 0, 4, 4, 0.0);
        bad.label = Array3::zeros((4, 4, 2));
        assert!(assembler(4).assemble(vec![bad]).is_err());
    }

    #[test]
    fn test_expected_shard_count() {
        let asm = VolumeAssembler::new(AssemblyConfig {
            cube_size: 4,
            shards_per_subject: Some(4),
            ..Default::default()
        })
        .unwrap();
        let two = vec![shard(1, 0, 2, 4, 0.0), shard(1, 1, 2, 4, 0.0)];
        assert!(asm.assemble(two).is_err());

        let four = (0..4).map(|i| shard(1, i, 1, 4, 0.0)).collect();
        assert!(asm.assemble(four).is_ok());
    }

    #[test]
    fn test_placement_is_cross_checked() {
        let mut a = shard(1, 0, 2, 4, 0.0);
        let mut b = shard(1, 1, 2, 4, 0.0);
        a.placement = Some([0, 0, 0]);
        b.placement = Some([2, 0, 0]);
        assert!(assembler(4).assemble(vec![a.clone(), b.clone()]).is_ok());

        b.placement = Some([1, 0, 0]);
        assert!(assembler(4).assemble(vec![a, b]).is_err());
    }

    #[test]
    fn test_empty_batch() {
        assert!(matches!(
            assembler(4).assemble(Vec::new()),
            Err(SlabError::EmptyBatch)
        ));
    }
}

//! Aligned crop sampling
//!
//! Draws `samples` windows per subject and cuts the same window out of the
//! data and the label volume. Crops of a subject occupy a contiguous block
//! of the output, in draw order.

use ndarray::{s, Array3, Array4, Array5, ArrayView3};
use tracing::trace;

use super::assembler::SubjectVolume;
use super::batch::TensorBatch;
use super::coords::{CoordinateGenerator, CropCoords};
use crate::error::{Result, SlabError};

/// Cuts aligned crops out of assembled volumes
#[derive(Debug, Clone, Copy)]
pub struct SubvolumeSampler {
    samples: usize,
}

impl SubvolumeSampler {
    pub fn new(samples: usize) -> Result<Self> {
        if samples == 0 {
            return Err(SlabError::invalid_config("samples per subject must be non-zero"));
        }
        Ok(Self { samples })
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Crop every volume `samples` times
    ///
    /// Slot `subject * samples + draw` holds the `draw`-th crop of the
    /// `subject`-th volume. A window that does not match the generator's crop
    /// shape or leaves the volume fails the batch.
    pub fn sample<G>(&self, volumes: &[SubjectVolume], generator: &mut G) -> Result<TensorBatch>
    where
        G: CoordinateGenerator + ?Sized,
    {
        if volumes.is_empty() {
            return Err(SlabError::EmptyBatch);
        }

        let crop = generator.crop_shape();
        let n = volumes.len() * self.samples;
        let mut data = Array5::<f32>::zeros((n, 1, crop[0], crop[1], crop[2]));
        let mut labels = Array4::<i64>::zeros((n, crop[0], crop[1], crop[2]));
        let mut subjects = Vec::with_capacity(n);

        for (i, volume) in volumes.iter().enumerate() {
            let bounds = volume.shape();
            for j in 0..self.samples {
                let coords = generator.get_coordinates();
                if !coords.fits(bounds, crop) {
                    return Err(SlabError::CropOutOfBounds {
                        coords: coords.to_string(),
                        volume: bounds,
                        crop,
                    });
                }

                let slot = i * self.samples + j;
                data.slice_mut(s![slot, 0, .., .., ..])
                    .assign(&window(&volume.data, &coords));
                labels
                    .slice_mut(s![slot, .., .., ..])
                    .assign(&window(&volume.labels, &coords));
                subjects.push(volume.key.clone());
                trace!("Subject {} crop {} -> slot {}", volume.key, coords, slot);
            }
        }

        Ok(TensorBatch {
            subjects,
            data,
            labels,
        })
    }
}

/// View of `volume` under `coords`; data and labels go through the same cut
pub fn window<'a, A>(volume: &'a Array3<A>, coords: &CropCoords) -> ArrayView3<'a, A> {
    volume.slice(s![
        coords.x.0..coords.x.1,
        coords.y.0..coords.y.1,
        coords.z.0..coords.z.1
    ])
}

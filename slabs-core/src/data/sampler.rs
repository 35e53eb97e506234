//! Epoch index sampling
//!
//! Shuffles dataset-relative indices once per epoch and cuts the
//! permutation into batches.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::error::{Result, SlabError};

/// Seeded batch sampler over `[0, len)`
#[derive(Debug, Clone)]
pub struct IndexSampler {
    len: usize,
    batch_size: usize,
    rng: ChaCha8Rng,
    epoch: u64,
}

impl IndexSampler {
    /// Create a sampler; `batch_size` must be non-zero
    pub fn new(len: usize, batch_size: usize, seed: u64) -> Result<Self> {
        if batch_size == 0 {
            return Err(SlabError::invalid_config("batch size must be non-zero"));
        }
        Ok(Self {
            len,
            batch_size,
            rng: ChaCha8Rng::seed_from_u64(seed),
            epoch: 0,
        })
    }

    /// Dataset length
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Batches per epoch, the last one possibly short
    pub fn num_batches(&self) -> usize {
        self.len.div_ceil(self.batch_size)
    }

    /// Epochs drawn so far
    pub fn epochs_drawn(&self) -> u64 {
        self.epoch
    }

    /// Draw the next epoch's permutation, split into batches
    pub fn next_epoch(&mut self) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.len).collect();
        order.shuffle(&mut self.rng);
        self.epoch += 1;

        let batches: Vec<Vec<usize>> = order
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();

        debug!(
            "Epoch {}: {} indices in {} batches",
            self.epoch,
            self.len,
            batches.len()
        );
        batches
    }
}

//! Crop placement
//!
//! A coordinate generator hands out one crop window per call. Windows are
//! half-open index ranges on each axis.

use std::collections::VecDeque;
use std::fmt;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::{Result, SlabError};

/// Half-open (start, end) ranges on the three volume axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CropCoords {
    pub x: (usize, usize),
    pub y: (usize, usize),
    pub z: (usize, usize),
}

impl CropCoords {
    /// Window of `shape` starting at `start`
    pub fn at(start: [usize; 3], shape: [usize; 3]) -> Self {
        Self {
            x: (start[0], start[0] + shape[0]),
            y: (start[1], start[1] + shape[1]),
            z: (start[2], start[2] + shape[2]),
        }
    }

    /// Extent on each axis; zero for inverted ranges
    pub fn extent(&self) -> [usize; 3] {
        [
            self.x.1.saturating_sub(self.x.0),
            self.y.1.saturating_sub(self.y.0),
            self.z.1.saturating_sub(self.z.0),
        ]
    }

    /// True when the window has exactly `crop` extent and lies inside `volume`
    pub fn fits(&self, volume: [usize; 3], crop: [usize; 3]) -> bool {
        let ranges = [self.x, self.y, self.z];
        (0..3).all(|axis| {
            let (start, end) = ranges[axis];
            start <= end && end - start == crop[axis] && end <= volume[axis]
        })
    }
}

impl fmt::Display for CropCoords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}..{}, {}..{}, {}..{}]",
            self.x.0, self.x.1, self.y.0, self.y.1, self.z.0, self.z.1
        )
    }
}

/// Source of crop windows
pub trait CoordinateGenerator {
    /// Shape of the full volume the windows are drawn from
    fn volume_shape(&self) -> [usize; 3];

    /// Shape of every window
    fn crop_shape(&self) -> [usize; 3];

    /// Next crop window
    fn get_coordinates(&mut self) -> CropCoords;
}

/// Draws window starts uniformly so the window always fits the volume
#[derive(Debug, Clone)]
pub struct UniformCoordsGenerator {
    volume: [usize; 3],
    crop: [usize; 3],
    rng: ChaCha8Rng,
}

impl UniformCoordsGenerator {
    pub fn new(volume: [usize; 3], crop: [usize; 3], seed: u64) -> Result<Self> {
        check_shapes(volume, crop)?;
        Ok(Self {
            volume,
            crop,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }
}

impl CoordinateGenerator for UniformCoordsGenerator {
    fn volume_shape(&self) -> [usize; 3] {
        self.volume
    }

    fn crop_shape(&self) -> [usize; 3] {
        self.crop
    }

    fn get_coordinates(&mut self) -> CropCoords {
        let mut start = [0usize; 3];
        for axis in 0..3 {
            start[axis] = self.rng.gen_range(0..=self.volume[axis] - self.crop[axis]);
        }
        CropCoords::at(start, self.crop)
    }
}

/// Replays a fixed list of windows, cycling when it runs out
#[derive(Debug, Clone)]
pub struct FixedCoords {
    volume: [usize; 3],
    crop: [usize; 3],
    queue: VecDeque<CropCoords>,
}

impl FixedCoords {
    pub fn new(volume: [usize; 3], crop: [usize; 3], windows: Vec<CropCoords>) -> Result<Self> {
        check_shapes(volume, crop)?;
        if windows.is_empty() {
            return Err(SlabError::invalid_config("fixed coordinate list is empty"));
        }
        Ok(Self {
            volume,
            crop,
            queue: windows.into(),
        })
    }
}

impl CoordinateGenerator for FixedCoords {
    fn volume_shape(&self) -> [usize; 3] {
        self.volume
    }

    fn crop_shape(&self) -> [usize; 3] {
        self.crop
    }

    fn get_coordinates(&mut self) -> CropCoords {
        // Non-empty by construction
        let next = self.queue[0];
        self.queue.rotate_left(1);
        next
    }
}

fn check_shapes(volume: [usize; 3], crop: [usize; 3]) -> Result<()> {
    if crop.iter().any(|&c| c == 0) {
        return Err(SlabError::invalid_config(format!(
            "crop shape {:?} has a zero extent",
            crop
        )));
    }
    if crop.iter().zip(volume.iter()).any(|(c, v)| c > v) {
        return Err(SlabError::invalid_config(format!(
            "crop shape {:?} exceeds volume shape {:?}",
            crop, volume
        )));
    }
    Ok(())
}

//! Orientation-consistency filter.
//!
//! Every accepted match votes with the keypoint angle difference into a
//! 30-bin histogram. Only the dominant rotation bins survive: the top bin and
//! the second/third bins if they hold at least 10% of the top bin's votes.

use std::f64::consts::TAU;

/// Number of rotation bins (12° each).
pub const HISTO_LENGTH: usize = 30;

#[derive(Debug, Clone)]
pub struct RotationHistogram {
    bins: Vec<Vec<usize>>,
}

impl RotationHistogram {
    pub fn new() -> Self {
        Self {
            bins: vec![Vec::new(); HISTO_LENGTH],
        }
    }

    /// Bin of an angle difference in radians.
    pub fn bin_of(angle1: f64, angle2: f64) -> usize {
        let rot = (angle1 - angle2).rem_euclid(TAU);
        let bin = (rot * HISTO_LENGTH as f64 / TAU).round() as usize;
        bin % HISTO_LENGTH
    }

    /// Vote for match `idx` with keypoint angles `angle1` (source) and `angle2` (target).
    pub fn add(&mut self, angle1: f64, angle2: f64, idx: usize) {
        if !angle1.is_finite() || !angle2.is_finite() {
            return;
        }
        self.bins[Self::bin_of(angle1, angle2)].push(idx);
    }

    /// The up to three most-voted bins. The second and third are dropped when
    /// they hold less than 10% of the top bin's votes.
    pub fn dominant_bins(&self) -> [Option<usize>; 3] {
        let mut max = [0usize; 3];
        let mut ind: [Option<usize>; 3] = [None; 3];

        for (i, bin) in self.bins.iter().enumerate() {
            let s = bin.len();
            if s > max[0] {
                max = [s, max[0], max[1]];
                ind = [Some(i), ind[0], ind[1]];
            } else if s > max[1] {
                max = [max[0], s, max[1]];
                ind = [ind[0], Some(i), ind[1]];
            } else if s > max[2] {
                max[2] = s;
                ind[2] = Some(i);
            }
        }

        let floor = 0.1 * max[0] as f64;
        if (max[1] as f64) < floor {
            ind[1] = None;
            ind[2] = None;
        } else if (max[2] as f64) < floor {
            ind[2] = None;
        }
        ind
    }

    /// Indices voted into bins outside the dominant ones.
    pub fn outliers(&self) -> Vec<usize> {
        let keep = self.dominant_bins();
        self.bins
            .iter()
            .enumerate()
            .filter(|(i, _)| !keep.contains(&Some(*i)))
            .flat_map(|(_, bin)| bin.iter().copied())
            .collect()
    }
}

impl Default for RotationHistogram {
    fn default() -> Self {
        Self::new()
    }
}

//! Hamming distance between ORB descriptors.

use crate::tracking::frame::Descriptor;

/// Number of differing bits, in `0..=256`.
pub fn descriptor_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    a.0.iter()
        .zip(b.0.iter())
        .map(|(x, y)| (x ^ y).count_ones())
        .sum()
}

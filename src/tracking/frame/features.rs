//! ORB keypoints and binary descriptors.

use nalgebra::Point2;

use crate::error::MatcherError;

/// Number of bytes in an ORB descriptor (256 bits).
pub const DESCRIPTOR_BYTES: usize = 32;

/// 256-bit binary ORB descriptor.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor(pub [u8; DESCRIPTOR_BYTES]);

impl Descriptor {
    pub fn zeros() -> Self {
        Self([0u8; DESCRIPTOR_BYTES])
    }

    /// Build a descriptor from a raw byte row (e.g. one row of an extractor output).
    pub fn from_slice(bytes: &[u8]) -> Result<Self, MatcherError> {
        let arr: [u8; DESCRIPTOR_BYTES] =
            bytes
                .try_into()
                .map_err(|_| MatcherError::DescriptorLength {
                    expected: DESCRIPTOR_BYTES,
                    got: bytes.len(),
                })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; DESCRIPTOR_BYTES] {
        &self.0
    }

    /// Value of bit `i` (0..256), least significant bit first within a byte.
    pub fn bit(&self, i: usize) -> bool {
        (self.0[i / 8] >> (i % 8)) & 1 == 1
    }

    pub fn set_bit(&mut self, i: usize, value: bool) {
        if value {
            self.0[i / 8] |= 1 << (i % 8);
        } else {
            self.0[i / 8] &= !(1 << (i % 8));
        }
    }
}

impl std::fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Descriptor(")?;
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..)")
    }
}

/// A detected keypoint. Immutable after detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPoint {
    /// Undistorted pixel position at pyramid level 0.
    pub pt: Point2<f64>,
    /// Pyramid level the keypoint was detected at.
    pub octave: usize,
    /// Orientation in radians.
    pub angle: f64,
    /// Detector response.
    pub response: f64,
}

impl KeyPoint {
    pub fn new(x: f64, y: f64, octave: usize, angle: f64) -> Self {
        Self {
            pt: Point2::new(x, y),
            octave,
            angle,
            response: 0.0,
        }
    }
}

/// A set of ORB features extracted from one image: parallel keypoints and descriptors.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    keypoints: Vec<KeyPoint>,
    descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    pub fn new(keypoints: Vec<KeyPoint>, descriptors: Vec<Descriptor>) -> Result<Self, MatcherError> {
        if keypoints.len() != descriptors.len() {
            return Err(MatcherError::FeatureCountMismatch {
                keypoints: keypoints.len(),
                descriptors: descriptors.len(),
            });
        }
        Ok(Self {
            keypoints,
            descriptors,
        })
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn keypoints(&self) -> &[KeyPoint] {
        &self.keypoints
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn keypoint(&self, idx: usize) -> &KeyPoint {
        &self.keypoints[idx]
    }

    pub fn descriptor(&self, idx: usize) -> &Descriptor {
        &self.descriptors[idx]
    }
}

//! Precondition errors raised when building matcher inputs.
//!
//! Search functions never fail: an empty result is a valid outcome. These
//! errors cover shape violations caught when frames, cameras and descriptors
//! are constructed.

/// Typed precondition failure for matcher input construction.
#[derive(Debug, Clone, PartialEq)]
pub enum MatcherError {
    /// A descriptor was built from a byte slice of the wrong length.
    DescriptorLength { expected: usize, got: usize },
    /// Keypoint and descriptor arrays differ in length.
    FeatureCountMismatch { keypoints: usize, descriptors: usize },
    /// Camera intrinsics or image size are not usable for projection.
    DegenerateCamera(String),
    /// A frame was promoted to a keyframe without a pose estimate.
    MissingPose,
    /// A keypoint octave is outside the scale pyramid.
    OctaveOutOfRange { octave: usize, n_levels: usize },
}

impl std::fmt::Display for MatcherError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatcherError::DescriptorLength { expected, got } => {
                write!(f, "Descriptor length mismatch: expected {} bytes, got {}", expected, got)
            }
            MatcherError::FeatureCountMismatch {
                keypoints,
                descriptors,
            } => write!(
                f,
                "Feature count mismatch: {} keypoints vs {} descriptors",
                keypoints, descriptors
            ),
            MatcherError::DegenerateCamera(msg) => write!(f, "Degenerate camera: {}", msg),
            MatcherError::MissingPose => write!(f, "Frame has no pose estimate"),
            MatcherError::OctaveOutOfRange { octave, n_levels } => write!(
                f,
                "Keypoint octave {} outside pyramid with {} levels",
                octave, n_levels
            ),
        }
    }
}

impl std::error::Error for MatcherError {}

//! ORB feature correspondence for visual SLAM.
//!
//! Given keypoints with binary descriptors from camera frames, stereo pairs
//! or a landmark map, [`matcher::OrbMatcher`] finds descriptor-consistent
//! correspondences under projection, vocabulary, window, epipolar,
//! similarity and stereo search regimes, and fuses duplicate landmarks.

pub mod atlas;
pub mod error;
pub mod geometry;
pub mod io;
pub mod matcher;
pub mod system;
pub mod tracking;
pub mod vocabulary;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::MatcherError;
pub use matcher::{MatcherConfig, OrbMatcher, SearchPrior};

//! ORB feature correspondence.
//!
//! [`OrbMatcher`] finds descriptor-consistent correspondences between
//! keypoints of Frames, KeyFrames and map landmarks under several search
//! regimes:
//!
//! - projection-guided ([`projection`]): landmarks projected with a pose or
//!   similarity prior, searched in a radius around the projection
//! - vocabulary-pruned ([`bow`]): only descriptors sharing a vocabulary node
//! - window ([`window`]): fixed pixel windows for initialization and
//!   short-baseline tracking
//! - epipolar ([`triangulation`]): candidate pairs for new landmarks
//! - similarity ([`sim3`]): mutual projection for loop registration
//! - stereo ([`stereo`], [`klt`]): left/right correspondences and depth
//! - fusion ([`fuse`]): duplicate landmark resolution
//!
//! The matcher itself only holds two parameters and never locks; searches
//! that change the map take `&mut Map` or produce [`crate::atlas::MapEdit`]s.

pub mod assignment;
pub mod bow;
pub mod distance;
pub mod fuse;
pub mod klt;
pub mod projection;
pub mod rotation;
pub mod sim3;
pub mod stereo;
pub mod triangulation;
pub mod window;

use serde::{Deserialize, Serialize};

use crate::geometry::{Sim3, SE3};
use crate::tracking::frame::FeatureView;

pub use assignment::Assignment;
pub use distance::descriptor_distance;
pub use fuse::FusionConfig;
pub use klt::{search_for_stereo_tracking, KltConfig, KltTracker};
pub use projection::{project_landmark, radius_by_viewing_cos, LandmarkProjection};
pub use rotation::{RotationHistogram, HISTO_LENGTH};
pub use stereo::compute_stereo_matches;
pub use triangulation::compute_f12;

/// Accept-outright bound in permissive contexts.
pub const TH_LOW: u32 = 50;
/// Upper bound in projection-guided search.
pub const TH_HIGH: u32 = 100;

/// Matcher parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Best/second-best distance ratio.
    pub nn_ratio: f32,
    /// Filter matches by dominant keypoint rotation.
    pub check_orientation: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            nn_ratio: 0.6,
            check_orientation: true,
        }
    }
}

/// Geometric prior for projection-guided search.
#[derive(Debug, Clone, Default)]
pub enum SearchPrior {
    /// Use the target view's own pose.
    #[default]
    None,
    /// World-to-camera rigid transform (`T_cw`).
    Pose(SE3),
    /// World-to-camera similarity (`S_cw`). Points are projected with its rigid part.
    Similarity(Sim3),
}

impl SearchPrior {
    /// World-to-camera rigid transform for projecting into `view`.
    pub fn pose_cw<V: FeatureView + ?Sized>(&self, view: &V) -> Option<SE3> {
        match self {
            SearchPrior::None => view.pose_cw(),
            SearchPrior::Pose(t_cw) => Some(t_cw.clone()),
            SearchPrior::Similarity(s_cw) => Some(s_cw.to_rigid()),
        }
    }
}

/// ORB descriptor matcher.
#[derive(Debug, Clone, Copy)]
pub struct OrbMatcher {
    nn_ratio: f32,
    check_orientation: bool,
}

impl OrbMatcher {
    pub fn new(nn_ratio: f32, check_orientation: bool) -> Self {
        Self {
            nn_ratio,
            check_orientation,
        }
    }

    pub fn from_config(config: &MatcherConfig) -> Self {
        Self::new(config.nn_ratio, config.check_orientation)
    }

    pub fn nn_ratio(&self) -> f32 {
        self.nn_ratio
    }

    pub fn check_orientation(&self) -> bool {
        self.check_orientation
    }

    /// `best < ratio * second`, evaluated in f32.
    fn passes_ratio(best: u32, second: u32, ratio: f32) -> bool {
        (best as f32) < ratio * second as f32
    }
}

impl Default for OrbMatcher {
    fn default() -> Self {
        Self::from_config(&MatcherConfig::default())
    }
}

/// Running best and second-best distance over a candidate set.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BestTwo {
    pub best: u32,
    pub second: u32,
    pub best_idx: Option<usize>,
    pub best_level: Option<usize>,
    pub second_level: Option<usize>,
}

impl BestTwo {
    pub fn new() -> Self {
        Self {
            best: u32::MAX,
            second: u32::MAX,
            best_idx: None,
            best_level: None,
            second_level: None,
        }
    }

    /// Ties keep the first-found best.
    pub fn offer(&mut self, idx: usize, dist: u32, level: usize) {
        if dist < self.best {
            self.second = self.best;
            self.second_level = self.best_level;
            self.best = dist;
            self.best_idx = Some(idx);
            self.best_level = Some(level);
        } else if dist < self.second {
            self.second = dist;
            self.second_level = Some(level);
        }
    }
}

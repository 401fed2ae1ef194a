//! Map module - landmark map data structures.
//!
//! This module contains:
//! - [`KeyFrame`] - Frames promoted into the map, with their landmark slots
//! - [`MapPoint`] - 3D landmarks observed by KeyFrames
//! - [`Map`] - Arena owning both, with association, fusion and edit application
//!
//! # Architecture
//!
//! The map forms a bipartite graph:
//! - KeyFrames observe MapPoints (KF → MP via `map_point_ids`)
//! - MapPoints track their observers (MP → KF via `observations`)
//!
//! Both directions are only edited through [`Map`] so they stay consistent.
//!
//! # Example
//!
//! ```ignore
//! use orb_matcher::atlas::map::{Map, MapEdit};
//!
//! let mut map = Map::new();
//! let kf_id = map.create_keyframe(&frame)?;
//! let mp_id = map.create_map_point(position, descriptor, kf_id);
//! map.associate(kf_id, feature_idx, mp_id);
//!
//! // Deferred fusion planned elsewhere:
//! map.apply_edits(&[MapEdit::Fuse { kf_id, feature_idx, map_point_id: mp_id }]);
//! ```

pub mod edits;
pub mod keyframe;
pub mod map;
pub mod map_point;
pub mod types;

pub use edits::{EditOutcome, MapEdit};
pub use keyframe::KeyFrame;
pub use map::Map;
pub use map_point::MapPoint;
pub use types::{KeyFrameId, MapPointId};

//! Atlas module - the landmark map the matcher reads and fusion edits.
//!
//! - [`map::KeyFrame`] - KeyFrames with landmark slots
//! - [`map::MapPoint`] - 3D landmarks with observation tracking
//! - [`map::Map`] - Arena with association, fusion and deferred edits

pub mod map;

pub use map::{EditOutcome, KeyFrame, KeyFrameId, Map, MapEdit, MapPoint, MapPointId};

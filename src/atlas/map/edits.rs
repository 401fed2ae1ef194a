//! Deferred map mutations.
//!
//! Searches that run under a read lock (or on another thread) describe the
//! changes they want as `MapEdit`s. [`super::Map::apply_edits`] re-validates
//! each edit against the current map state when it is applied, so a stale or
//! repeated edit degrades to a no-op.

use super::types::{KeyFrameId, MapPointId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapEdit {
    /// Put `map_point_id` into slot `feature_idx` of `kf_id`. An empty slot gets
    /// a new observation; an occupied slot fuses the two landmarks, keeping the
    /// one with more observations (the incoming landmark wins ties).
    Fuse {
        kf_id: KeyFrameId,
        feature_idx: usize,
        map_point_id: MapPointId,
    },
    /// Merge `goner` into `keeper` unconditionally.
    Replace {
        goner: MapPointId,
        keeper: MapPointId,
    },
}

/// Counts produced by [`super::Map::apply_edits`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EditOutcome {
    /// New observations attached to empty slots.
    pub added: usize,
    /// Landmark pairs merged.
    pub fused: usize,
    /// Edits that no longer applied.
    pub skipped: usize,
}

impl EditOutcome {
    /// Associations created or merged.
    pub fn applied(&self) -> usize {
        self.added + self.fused
    }
}

impl std::ops::AddAssign for EditOutcome {
    fn add_assign(&mut self, rhs: Self) {
        self.added += rhs.added;
        self.fused += rhs.fused;
        self.skipped += rhs.skipped;
    }
}

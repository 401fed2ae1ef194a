//! Lock-guarded map shared between threads.
//!
//! Searches run under the read lock; map edits take the write lock for one
//! scope and release it on every exit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::atlas::map::{EditOutcome, KeyFrameId, Map, MapPointId};
use crate::matcher::OrbMatcher;

/// Map plus the shutdown flag observed by the map-owner thread.
pub struct SharedMap {
    /// Readers search, writers apply edits.
    pub map: RwLock<Map>,

    /// Request the map-owner thread to exit.
    pub shutdown_requested: AtomicBool,
}

impl SharedMap {
    pub fn new(map: Map) -> Arc<Self> {
        Arc::new(Self {
            map: RwLock::new(map),
            shutdown_requested: AtomicBool::new(false),
        })
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Fuse `candidates` into KeyFrame `kf_id`: the search holds only the
    /// read lock, the edits are applied under the write lock.
    ///
    /// Another writer may change the map between the two phases; edits that
    /// no longer apply are skipped.
    pub fn fuse_guarded(
        &self,
        matcher: &OrbMatcher,
        kf_id: KeyFrameId,
        candidates: &[MapPointId],
        th: f64,
    ) -> EditOutcome {
        let edits = {
            let map = self.map.read();
            let Some(kf) = map.keyframe(kf_id) else {
                return EditOutcome::default();
            };
            matcher.plan_fusion(kf, &map, candidates, th)
        };
        if edits.is_empty() {
            return EditOutcome::default();
        }
        self.map.write().apply_edits(&edits)
    }

    /// Fuse with the write lock held for the whole search.
    pub fn fuse_exclusive(
        &self,
        matcher: &OrbMatcher,
        kf_id: KeyFrameId,
        candidates: &[MapPointId],
        th: f64,
    ) -> usize {
        let mut map = self.map.write();
        matcher.fuse(&mut map, kf_id, candidates, th)
    }
}

impl Default for SharedMap {
    fn default() -> Self {
        Self {
            map: RwLock::new(Map::new()),
            shutdown_requested: AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SE3;
    use crate::test_support::{lattice_points, observing_frame, random_descriptors, scene_with_keyframe};
    use nalgebra::{Matrix3, Vector3};
    use std::thread;

    #[test]
    fn test_shutdown_flag() {
        let shared = SharedMap::new(Map::new());
        assert!(!shared.is_shutdown_requested());
        shared.request_shutdown();
        assert!(shared.is_shutdown_requested());
    }

    #[test]
    fn test_concurrent_fusion_applies_once() {
        let points = lattice_points(10);
        let descs = random_descriptors(10, 81);
        let mut scene = scene_with_keyframe(&points, &descs, &SE3::identity());
        // A second KeyFrame holding its own copies of the landmarks.
        let pose2 = SE3::from_rt(Matrix3::identity(), Vector3::new(0.1, 0.0, 0.0));
        let kf2 = scene.map.create_keyframe(&observing_frame(&points, &descs, &pose2)).unwrap();
        let copies: Vec<MapPointId> = (0..10)
            .map(|i| {
                let mp = scene.map.create_map_point(points[i], descs[i], kf2);
                scene.map.associate(kf2, i, mp);
                scene.map.update_map_point_normal_and_depth(mp);
                mp
            })
            .collect();
        let kf1 = scene.kf;
        let shared = SharedMap::new(scene.map);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = Arc::clone(&shared);
                let copies = copies.clone();
                thread::spawn(move || {
                    shared.fuse_guarded(&OrbMatcher::default(), kf1, &copies, 3.0).applied()
                })
            })
            .collect();
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        // Each duplicate pair merges exactly once whatever the interleaving.
        assert_eq!(total, 10);
        let map = shared.map.read();
        assert_eq!(map.map_points().filter(|mp| mp.is_valid()).count(), 10);
        let kf = map.keyframe(kf1).unwrap();
        for idx in 0..10 {
            let mp = map.map_point(kf.get_map_point(idx).unwrap()).unwrap();
            assert_eq!(mp.num_observations(), 2);
        }
        drop(map);

        assert_eq!(shared.fuse_exclusive(&OrbMatcher::default(), kf1, &copies, 3.0), 0);
    }
}

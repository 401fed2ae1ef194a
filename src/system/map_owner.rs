//! Map-owner thread: the single writer of a shared map.
//!
//! Other threads search under the read lock and send the resulting
//! [`MapEdit`](crate::atlas::MapEdit) batches here instead of taking the
//! write lock themselves.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::atlas::map::EditOutcome;

use super::messages::MapCommand;
use super::shared_state::SharedMap;

/// Timeout for receiving commands from the channel.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// What the map owner did before exiting.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MapOwnerStats {
    pub batches: usize,
    pub outcome: EditOutcome,
}

struct MapOwner {
    shared: Arc<SharedMap>,
    stats: MapOwnerStats,
}

impl MapOwner {
    fn run(&mut self, receiver: Receiver<MapCommand>) {
        tracing::info!("MapOwner thread started");

        loop {
            if self.shared.is_shutdown_requested() {
                break;
            }

            match receiver.recv_timeout(RECV_TIMEOUT) {
                Ok(MapCommand::Apply { edits, reply }) => {
                    let outcome = self.shared.map.write().apply_edits(&edits);
                    self.stats.batches += 1;
                    self.stats.outcome += outcome;
                    if let Some(reply) = reply {
                        // The requester may have stopped waiting.
                        let _ = reply.send(outcome);
                    }
                }
                Ok(MapCommand::Shutdown) => break,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::info!("MapOwner channel disconnected");
                    break;
                }
            }
        }

        tracing::info!(
            "MapOwner thread exiting. Stats: batches={}, added={}, fused={}, skipped={}",
            self.stats.batches,
            self.stats.outcome.added,
            self.stats.outcome.fused,
            self.stats.outcome.skipped
        );
    }
}

/// Spawn the map-owner thread.
///
/// It exits on [`MapCommand::Shutdown`], when every sender is dropped, or
/// when [`SharedMap::request_shutdown`] is called.
pub fn spawn_map_owner(shared: Arc<SharedMap>, receiver: Receiver<MapCommand>) -> thread::JoinHandle<MapOwnerStats> {
    thread::spawn(move || {
        let mut owner = MapOwner {
            shared,
            stats: MapOwnerStats::default(),
        };
        owner.run(receiver);
        owner.stats
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::map::{Map, MapPointId};
    use crate::geometry::SE3;
    use crate::matcher::OrbMatcher;
    use crate::test_support::{lattice_points, random_descriptors, scene_with_keyframe};
    use crossbeam_channel::{bounded, unbounded};

    #[test]
    fn test_applies_planned_edits_and_replies() {
        let points = lattice_points(8);
        let descs = random_descriptors(8, 91);
        let mut scene = scene_with_keyframe(&points, &descs, &SE3::identity());
        scene.map.disassociate(scene.kf, 2);
        let fresh: MapPointId = scene.map.create_map_point(points[2], descs[2], scene.kf);
        let kf_id = scene.kf;
        let shared = SharedMap::new(scene.map);

        let (tx, rx) = unbounded();
        let handle = spawn_map_owner(Arc::clone(&shared), rx);

        let edits = {
            let map = shared.map.read();
            OrbMatcher::default().plan_fusion(map.keyframe(kf_id).unwrap(), &map, &[fresh], 3.0)
        };
        assert_eq!(edits.len(), 1);

        let (reply_tx, reply_rx) = bounded(1);
        tx.send(MapCommand::Apply {
            edits: edits.clone(),
            reply: Some(reply_tx),
        })
        .unwrap();
        assert_eq!(reply_rx.recv().unwrap().added, 1);

        // Replaying the same batch changes nothing.
        tx.send(MapCommand::Apply { edits, reply: None }).unwrap();
        tx.send(MapCommand::Shutdown).unwrap();
        let stats = handle.join().unwrap();

        assert_eq!(stats.batches, 2);
        assert_eq!(stats.outcome.added, 1);
        assert_eq!(stats.outcome.skipped, 1);
        assert_eq!(shared.map.read().keyframe(kf_id).unwrap().get_map_point(2), Some(fresh));
    }

    #[test]
    fn test_exits_when_senders_dropped() {
        let shared = SharedMap::new(Map::new());
        let (tx, rx) = unbounded::<MapCommand>();
        let handle = spawn_map_owner(shared, rx);
        drop(tx);
        assert_eq!(handle.join().unwrap().batches, 0);
    }
}

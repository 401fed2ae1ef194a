//! Messages understood by the map-owner thread.

use crossbeam_channel::Sender;

use crate::atlas::map::{EditOutcome, MapEdit};

pub enum MapCommand {
    /// Apply a batch of edits in order. The outcome is sent back on `reply`
    /// if one is given.
    Apply {
        edits: Vec<MapEdit>,
        reply: Option<Sender<EditOutcome>>,
    },
    /// Stop after the commands already queued.
    Shutdown,
}

impl std::fmt::Debug for MapCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapCommand::Apply { edits, reply } => f
                .debug_struct("Apply")
                .field("edits", &edits.len())
                .field("reply", &reply.is_some())
                .finish(),
            MapCommand::Shutdown => f.write_str("Shutdown"),
        }
    }
}

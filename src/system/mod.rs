//! Shared map access for concurrent callers.
//!
//! Two disciplines are offered for mutating a map that several threads read:
//! [`SharedMap`] guards it with a read/write lock, and [`spawn_map_owner`]
//! runs a thread that owns all writes and applies [`crate::atlas::MapEdit`]
//! batches sent over a channel.

pub mod map_owner;
pub mod messages;
pub mod shared_state;

pub use map_owner::{spawn_map_owner, MapOwnerStats};
pub use messages::MapCommand;
pub use shared_state::SharedMap;

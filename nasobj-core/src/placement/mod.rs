//! Name-to-path mapping and file/directory collision detection.

pub mod collision;
pub mod path_mapper;

pub use collision::{CollisionDetector, ConflictRecord, EntryKind};
pub use path_mapper::{PathMapper, PlacementPath, account_hash_prefix};

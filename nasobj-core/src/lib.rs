//! nasobj Core - object placement and storage directly on a shared filesystem

pub mod config;
pub mod error;
pub mod expiry;
pub mod operations;
pub mod placement;
pub mod ring;
pub mod service;
pub mod storage;
pub mod timestamp;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::StorageConfig;
pub use error::{NasError, Result};
pub use expiry::{ExpiryMarker, ExpiryTracker};
pub use operations::*;
pub use placement::{
    CollisionDetector, ConflictRecord, EntryKind, PathMapper, PlacementPath, account_hash_prefix,
};
pub use ring::{
    ACCOUNT_RING, CONTAINER_RING, DeviceRecord, OBJECT_RING, PathHasher, Ring, RingDescriptor,
    RingHandle, RingResolver,
};
pub use service::{ObjectResponse, ObjectService, UpdateOp};
pub use storage::{
    AlwaysMounted, DEFAULT_CONTENT_TYPE, DELETE_AT_HEADER, DIRECTORY_CONTENT_TYPE, DiskFile,
    DiskFileManager, FsMountCheck, MountCheck, ObjectBody, ObjectMetadata, ObjectReader,
    PutResult, WriteOutcome,
};
pub use timestamp::Timestamp;

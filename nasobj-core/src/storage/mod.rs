//! On-disk object entries: metadata, blocking I/O pools and the disk file
//! manager that ties them together.

pub mod diskfile;
pub mod metadata;
pub mod os;
pub mod worker_pool;

pub use diskfile::{DiskFile, DiskFileManager, ObjectBody, ObjectReader, PutResult, WriteOutcome};
pub use metadata::{
    DEFAULT_CONTENT_TYPE, DELETE_AT_HEADER, DIRECTORY_CONTENT_TYPE, ObjectMetadata,
    canonical_header_name, read_metadata, write_metadata,
};
pub use os::{AlwaysMounted, FsMountCheck, MountCheck};
pub use worker_pool::{DevicePools, DeviceQueue, PathLocks};

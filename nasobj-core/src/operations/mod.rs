pub mod delete_object;
pub mod put_object;
pub mod read_object;

pub use delete_object::{
    DeleteObjectOperation, DeleteObjectOperationOutcome, DeleteObjectOperationRequest,
};
pub use put_object::{
    PutObjectOperation, PutObjectOperationOutcome, PutObjectOperationRequest,
    PutObjectOperationResult,
};
pub use read_object::{
    ReadObjectOperation, ReadObjectOperationOutcome, ReadObjectOperationRequest,
    ReadObjectOperationResult,
};

use crate::config::StorageConfig;
use crate::error::{NasError, Result};
use crate::ring::{OBJECT_RING, RingResolver};
use crate::storage::{DiskFile, DiskFileManager};
use std::sync::Arc;

/// Resolves a tenant object to its disk file: the account's primary device
/// from the object ring, then the placement path on that device.
#[derive(Clone)]
pub struct ObjectLocator {
    ring: Arc<RingResolver>,
    disk: Arc<DiskFileManager>,
    reserved_account: String,
}

impl ObjectLocator {
    pub fn new(ring: Arc<RingResolver>, disk: Arc<DiskFileManager>, config: &StorageConfig) -> Self {
        Self {
            ring,
            disk,
            reserved_account: config.expiring_objects_account.clone(),
        }
    }

    /// The whole account lives on one device so that its directory tree is a
    /// single namespace on the share.
    pub fn device_for_account(&self, account: &str) -> Result<String> {
        let (partition, nodes) = self.ring.get_nodes(OBJECT_RING, account, None, None)?;
        nodes
            .into_iter()
            .next()
            .map(|node| node.device_name)
            .ok_or_else(|| {
                NasError::BackingStoreUnavailable(format!(
                    "no device assigned to partition {}",
                    partition
                ))
            })
    }

    pub async fn locate(&self, account: &str, container: &str, object: &str) -> Result<DiskFile> {
        if account == self.reserved_account {
            return Err(NasError::invalid_name(account, "reserved account"));
        }

        let device = self.device_for_account(account)?;
        self.disk.disk_file(&device, account, container, object).await
    }
}

pub(crate) fn now_secs() -> u64 {
    crate::timestamp::Timestamp::now().as_secs()
}

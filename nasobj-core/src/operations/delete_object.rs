use crate::Result;
use crate::expiry::ExpiryTracker;
use crate::operations::ObjectLocator;
use crate::storage::{DiskFileManager, WriteOutcome};
use crate::timestamp::Timestamp;
use std::sync::Arc;

#[derive(Clone)]
pub struct DeleteObjectOperation {
    locator: ObjectLocator,
    disk: Arc<DiskFileManager>,
    tracker: Arc<ExpiryTracker>,
}

#[derive(Debug, Clone)]
pub struct DeleteObjectOperationRequest {
    pub account: String,
    pub container: String,
    pub object: String,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteObjectOperationOutcome {
    Deleted,
    /// The entry is newer than the delete; it was left in place.
    Stale,
}

impl DeleteObjectOperation {
    pub fn new(
        locator: ObjectLocator,
        disk: Arc<DiskFileManager>,
        tracker: Arc<ExpiryTracker>,
    ) -> Self {
        Self {
            locator,
            disk,
            tracker,
        }
    }

    pub async fn run(
        &self,
        request: DeleteObjectOperationRequest,
    ) -> Result<DeleteObjectOperationOutcome> {
        let DeleteObjectOperationRequest {
            account,
            container,
            object,
            timestamp,
        } = request;

        let disk_file = self.locator.locate(&account, &container, &object).await?;
        let previous = self.disk.read_metadata(&disk_file).await?;

        if self.disk.delete(&disk_file, timestamp).await? == WriteOutcome::Stale {
            return Ok(DeleteObjectOperationOutcome::Stale);
        }

        if let Some(deadline) = previous.and_then(|old| old.delete_at().ok().flatten()) {
            self.tracker
                .cancel_expiry(&account, &container, &object, deadline, timestamp)
                .await;
        }

        tracing::debug!(
            "Deleted {}/{}/{} at {} on {}",
            account,
            container,
            object,
            timestamp,
            disk_file.device()
        );

        Ok(DeleteObjectOperationOutcome::Deleted)
    }
}

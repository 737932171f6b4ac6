use crate::config::StorageConfig;
use crate::error::{NasError, Result};
use crate::ring::{OBJECT_RING, RingResolver};
use crate::storage::{
    DELETE_AT_HEADER, DiskFile, DiskFileManager, ObjectMetadata, PutResult, WriteOutcome,
};
use crate::timestamp::Timestamp;
use bytes::Bytes;
use futures::stream;
use std::io;
use std::sync::Arc;

pub const MARKER_CONTENT_TYPE: &str = "text/plain";
pub const MARKER_ACCOUNT_HEADER: &str = "X-Expiring-Account";
pub const MARKER_CONTAINER_HEADER: &str = "X-Expiring-Container";
pub const MARKER_OBJECT_HEADER: &str = "X-Expiring-Object";

/// Zero-byte placeholder under the reserved account recording that
/// `account/container/object` is due for deletion at `deadline`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryMarker {
    pub account: String,
    pub container: String,
    pub object: String,
    pub deadline: u64,
}

impl ExpiryMarker {
    pub fn new(
        account: impl Into<String>,
        container: impl Into<String>,
        object: impl Into<String>,
        deadline: u64,
    ) -> Self {
        Self {
            account: account.into(),
            container: container.into(),
            object: object.into(),
            deadline,
        }
    }

    /// Markers are bucketed into containers named after the deadline rounded
    /// down to a multiple of `divisor`.
    pub fn container_name(&self, divisor: u64) -> String {
        let divisor = divisor.max(1);
        (self.deadline / divisor * divisor).to_string()
    }

    pub fn object_name(&self) -> String {
        format!(
            "{:010}-{}/{}/{}",
            self.deadline, self.account, self.container, self.object
        )
    }

    /// Inverse of [`ExpiryMarker::container_name`] and
    /// [`ExpiryMarker::object_name`], for sweepers listing the reserved account.
    pub fn parse(container: &str, name: &str) -> Result<Self> {
        let invalid = || NasError::InvalidRequest(format!("invalid expiry marker '{}'", name));

        let bucket: u64 = container.parse().map_err(|_| {
            NasError::InvalidRequest(format!("invalid expiry container '{}'", container))
        })?;

        let (deadline, target) = name.split_once('-').ok_or_else(invalid)?;
        let deadline: u64 = deadline.parse().map_err(|_| invalid())?;
        if bucket > deadline {
            return Err(invalid());
        }

        let mut parts = target.splitn(3, '/');
        let (account, container, object) = match (parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(c), Some(o)) if !a.is_empty() && !c.is_empty() && !o.is_empty() => {
                (a, c, o)
            }
            _ => return Err(invalid()),
        };

        Ok(Self::new(account, container, object, deadline))
    }

    pub fn to_metadata(&self, timestamp: Timestamp) -> ObjectMetadata {
        ObjectMetadata::new(timestamp, MARKER_CONTENT_TYPE)
            .with_header(MARKER_ACCOUNT_HEADER, &self.account)
            .with_header(MARKER_CONTAINER_HEADER, &self.container)
            .with_header(MARKER_OBJECT_HEADER, &self.object)
            .with_header(DELETE_AT_HEADER, self.deadline.to_string())
    }

    pub fn from_metadata(metadata: &ObjectMetadata) -> Result<Self> {
        let field = |name: &str| {
            metadata
                .header(name)
                .map(str::to_string)
                .ok_or_else(|| NasError::InvalidRequest(format!("expiry marker lacks {}", name)))
        };

        let deadline = metadata
            .delete_at()?
            .ok_or_else(|| NasError::InvalidRequest(format!("expiry marker lacks {}", DELETE_AT_HEADER)))?;

        Ok(Self {
            account: field(MARKER_ACCOUNT_HEADER)?,
            container: field(MARKER_CONTAINER_HEADER)?,
            object: field(MARKER_OBJECT_HEADER)?,
            deadline,
        })
    }
}

/// Writes and removes expiry markers on the reserved account's device.
///
/// The reserved account is its own device: it must appear in the object ring
/// and pass the mount check before any marker is touched.
pub struct ExpiryTracker {
    ring: Arc<RingResolver>,
    disk: Arc<DiskFileManager>,
    reserved_account: String,
    divisor: u64,
}

impl ExpiryTracker {
    pub fn new(ring: Arc<RingResolver>, disk: Arc<DiskFileManager>, config: &StorageConfig) -> Self {
        Self {
            ring,
            disk,
            reserved_account: config.expiring_objects_account.clone(),
            divisor: config.expiring_objects_container_divisor,
        }
    }

    pub fn reserved_account(&self) -> &str {
        &self.reserved_account
    }

    pub fn divisor(&self) -> u64 {
        self.divisor
    }

    /// Rejects a marker whose name the reserved account's device cannot hold.
    pub fn validate_marker(&self, marker: &ExpiryMarker) -> Result<()> {
        self.disk
            .mapper()
            .validate_object_name(&marker.object_name())
            .map_err(|error| {
                NasError::InvalidRequest(format!(
                    "cannot track {} for {}/{}/{}: {}",
                    DELETE_AT_HEADER, marker.account, marker.container, marker.object, error
                ))
            })
    }

    pub async fn marker_file(&self, marker: &ExpiryMarker) -> Result<DiskFile> {
        if !self.ring.has_device(OBJECT_RING, &self.reserved_account)? {
            return Err(NasError::BackingStoreUnavailable(format!(
                "{} volume not in ring",
                self.reserved_account
            )));
        }

        self.disk
            .disk_file(
                &self.reserved_account,
                &self.reserved_account,
                &marker.container_name(self.divisor),
                &marker.object_name(),
            )
            .await
    }

    pub async fn try_schedule_expiry(
        &self,
        marker: &ExpiryMarker,
        timestamp: Timestamp,
    ) -> Result<PutResult> {
        let disk_file = self.marker_file(marker).await?;
        let empty = stream::empty::<io::Result<Bytes>>();
        self.disk
            .put(&disk_file, empty, marker.to_metadata(timestamp))
            .await
    }

    /// Best-effort: failures are logged and the triggering request proceeds.
    pub async fn schedule_expiry(
        &self,
        account: &str,
        container: &str,
        object: &str,
        deadline: u64,
        timestamp: Timestamp,
    ) -> bool {
        let marker = ExpiryMarker::new(account, container, object, deadline);
        match self.try_schedule_expiry(&marker, timestamp).await {
            Ok(_) => {
                tracing::debug!(
                    "Scheduled expiry of {}/{}/{} at {}",
                    account,
                    container,
                    object,
                    deadline
                );
                true
            }
            Err(error) => {
                tracing::error!(
                    "Creation of expiry marker {}/{} failed: {}",
                    marker.container_name(self.divisor),
                    marker.object_name(),
                    error
                );
                false
            }
        }
    }

    pub async fn try_cancel_expiry(
        &self,
        marker: &ExpiryMarker,
        timestamp: Timestamp,
    ) -> Result<WriteOutcome> {
        let disk_file = self.marker_file(marker).await?;
        match self.disk.delete(&disk_file, timestamp).await {
            Err(NasError::NotFound(_)) => Ok(WriteOutcome::Stale),
            other => other,
        }
    }

    /// Removes a previously scheduled marker; a missing marker is fine.
    pub async fn cancel_expiry(
        &self,
        account: &str,
        container: &str,
        object: &str,
        deadline: u64,
        timestamp: Timestamp,
    ) -> bool {
        let marker = ExpiryMarker::new(account, container, object, deadline);
        match self.try_cancel_expiry(&marker, timestamp).await {
            Ok(_) => true,
            Err(error) => {
                tracing::warn!(
                    "Removal of expiry marker {}/{} failed: {}",
                    marker.container_name(self.divisor),
                    marker.object_name(),
                    error
                );
                false
            }
        }
    }
}

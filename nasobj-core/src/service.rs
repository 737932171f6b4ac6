use crate::config::StorageConfig;
use crate::error::NasError;
use crate::expiry::{ExpiryMarker, ExpiryTracker};
use crate::operations::{
    DeleteObjectOperation, DeleteObjectOperationOutcome, DeleteObjectOperationRequest,
    ObjectLocator, PutObjectOperation, PutObjectOperationOutcome, PutObjectOperationRequest,
    ReadObjectOperation, ReadObjectOperationOutcome, ReadObjectOperationRequest,
};
use crate::ring::RingResolver;
use crate::storage::{DiskFileManager, ObjectBody, ObjectMetadata};
use crate::timestamp::Timestamp;
use std::fmt;
use std::sync::Arc;

/// Protocol-level result handed back to the request layer.
pub enum ObjectResponse {
    Created { metadata: ObjectMetadata },
    NoContent,
    Accepted,
    Ok {
        metadata: ObjectMetadata,
        body: Option<ObjectBody>,
    },
    BadRequest(String),
    NotFound,
    Conflict(String),
    UnprocessableEntity(String),
    InternalError(String),
    NotImplemented,
    ServiceUnavailable(String),
}

impl ObjectResponse {
    pub fn status_code(&self) -> u16 {
        match self {
            ObjectResponse::Created { .. } => 201,
            ObjectResponse::NoContent => 204,
            ObjectResponse::Accepted => 202,
            ObjectResponse::Ok { .. } => 200,
            ObjectResponse::BadRequest(_) => 400,
            ObjectResponse::NotFound => 404,
            ObjectResponse::Conflict(_) => 409,
            ObjectResponse::UnprocessableEntity(_) => 422,
            ObjectResponse::InternalError(_) => 500,
            ObjectResponse::NotImplemented => 501,
            ObjectResponse::ServiceUnavailable(_) => 503,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code())
    }

    pub fn metadata(&self) -> Option<&ObjectMetadata> {
        match self {
            ObjectResponse::Created { metadata } | ObjectResponse::Ok { metadata, .. } => {
                Some(metadata)
            }
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ObjectResponse::BadRequest(reason)
            | ObjectResponse::Conflict(reason)
            | ObjectResponse::UnprocessableEntity(reason)
            | ObjectResponse::InternalError(reason)
            | ObjectResponse::ServiceUnavailable(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn into_body(self) -> Option<ObjectBody> {
        match self {
            ObjectResponse::Ok { body, .. } => body,
            _ => None,
        }
    }
}

impl fmt::Debug for ObjectResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectResponse::Created { metadata } => {
                f.debug_struct("Created").field("metadata", metadata).finish()
            }
            ObjectResponse::Ok { metadata, body } => f
                .debug_struct("Ok")
                .field("metadata", metadata)
                .field("has_body", &body.is_some())
                .finish(),
            ObjectResponse::BadRequest(reason) => f.debug_tuple("BadRequest").field(reason).finish(),
            ObjectResponse::Conflict(reason) => f.debug_tuple("Conflict").field(reason).finish(),
            ObjectResponse::UnprocessableEntity(reason) => {
                f.debug_tuple("UnprocessableEntity").field(reason).finish()
            }
            ObjectResponse::InternalError(reason) => {
                f.debug_tuple("InternalError").field(reason).finish()
            }
            ObjectResponse::ServiceUnavailable(reason) => {
                f.debug_tuple("ServiceUnavailable").field(reason).finish()
            }
            ObjectResponse::NoContent => f.write_str("NoContent"),
            ObjectResponse::Accepted => f.write_str("Accepted"),
            ObjectResponse::NotFound => f.write_str("NotFound"),
            ObjectResponse::NotImplemented => f.write_str("NotImplemented"),
        }
    }
}

impl From<NasError> for ObjectResponse {
    fn from(error: NasError) -> Self {
        match error {
            NasError::InvalidName { .. } | NasError::InvalidRequest(_) => {
                ObjectResponse::BadRequest(error.to_string())
            }
            NasError::ExistsAsFile(_)
            | NasError::ExistsAsDir(_)
            | NasError::DirectoryNotEmpty(_) => ObjectResponse::Conflict(error.to_string()),
            NasError::NotFound(_) => ObjectResponse::NotFound,
            NasError::BackingStoreUnavailable(_) => {
                tracing::warn!("{}", error);
                ObjectResponse::ServiceUnavailable(error.to_string())
            }
            NasError::EtagMismatch { .. } => ObjectResponse::UnprocessableEntity(error.to_string()),
            NasError::Io(_)
            | NasError::Serialization(_)
            | NasError::Config(_)
            | NasError::RingLoad(_)
            | NasError::Internal(_) => {
                tracing::error!("Object request failed: {}", error);
                ObjectResponse::InternalError(error.to_string())
            }
        }
    }
}

/// Kind of deferred container update the host protocol asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Put,
    Delete,
}

/// Entry point for the request layer: runs object operations and translates
/// their outcomes into protocol responses.
pub struct ObjectService {
    locator: ObjectLocator,
    tracker: Arc<ExpiryTracker>,
    put_operation: PutObjectOperation,
    read_operation: ReadObjectOperation,
    delete_operation: DeleteObjectOperation,
}

impl ObjectService {
    pub fn new(ring: Arc<RingResolver>, disk: Arc<DiskFileManager>, config: &StorageConfig) -> Self {
        let locator = ObjectLocator::new(Arc::clone(&ring), Arc::clone(&disk), config);
        let tracker = Arc::new(ExpiryTracker::new(ring, Arc::clone(&disk), config));

        Self {
            put_operation: PutObjectOperation::new(
                locator.clone(),
                Arc::clone(&disk),
                Arc::clone(&tracker),
            ),
            read_operation: ReadObjectOperation::new(locator.clone(), Arc::clone(&disk)),
            delete_operation: DeleteObjectOperation::new(
                locator.clone(),
                disk,
                Arc::clone(&tracker),
            ),
            locator,
            tracker,
        }
    }

    pub fn locator(&self) -> &ObjectLocator {
        &self.locator
    }

    pub fn tracker(&self) -> &ExpiryTracker {
        &self.tracker
    }

    pub async fn put(&self, request: PutObjectOperationRequest) -> ObjectResponse {
        match self.put_operation.run(request).await {
            Ok(PutObjectOperationOutcome::Committed(result))
            | Ok(PutObjectOperationOutcome::Stale(result)) => ObjectResponse::Created {
                metadata: result.metadata,
            },
            Err(error) => error.into(),
        }
    }

    pub async fn get(&self, account: &str, container: &str, object: &str) -> ObjectResponse {
        self.read(account, container, object, true).await
    }

    pub async fn head(&self, account: &str, container: &str, object: &str) -> ObjectResponse {
        self.read(account, container, object, false).await
    }

    async fn read(
        &self,
        account: &str,
        container: &str,
        object: &str,
        include_body: bool,
    ) -> ObjectResponse {
        let request = ReadObjectOperationRequest {
            account: account.to_string(),
            container: container.to_string(),
            object: object.to_string(),
            include_body,
        };

        match self.read_operation.run(request).await {
            Ok(ReadObjectOperationOutcome::Found(result)) => ObjectResponse::Ok {
                metadata: result.metadata,
                body: result.body,
            },
            Ok(ReadObjectOperationOutcome::NotFound) | Ok(ReadObjectOperationOutcome::Expired) => {
                ObjectResponse::NotFound
            }
            Err(error) => error.into(),
        }
    }

    pub async fn delete(
        &self,
        account: &str,
        container: &str,
        object: &str,
        timestamp: Timestamp,
    ) -> ObjectResponse {
        let request = DeleteObjectOperationRequest {
            account: account.to_string(),
            container: container.to_string(),
            object: object.to_string(),
            timestamp,
        };

        match self.delete_operation.run(request).await {
            Ok(DeleteObjectOperationOutcome::Deleted) | Ok(DeleteObjectOperationOutcome::Stale) => {
                ObjectResponse::NoContent
            }
            Err(error) => error.into(),
        }
    }

    /// Records a deferred deletion. Marker failures are logged, never
    /// surfaced.
    pub async fn schedule_expiry(
        &self,
        account: &str,
        container: &str,
        object: &str,
        deadline: u64,
        timestamp: Timestamp,
    ) -> ObjectResponse {
        self.tracker
            .schedule_expiry(account, container, object, deadline, timestamp)
            .await;
        ObjectResponse::Accepted
    }

    /// Containers are plain directories; there is no listing to update.
    pub fn container_update(&self, _account: &str, _container: &str, _object: &str) -> ObjectResponse {
        ObjectResponse::Accepted
    }

    /// Deferred update addressed at a container. Updates for the reserved
    /// account's containers are marker writes; everything else is a no-op.
    pub async fn async_update(
        &self,
        op: UpdateOp,
        account: &str,
        container: &str,
        object: &str,
        timestamp: Timestamp,
    ) -> ObjectResponse {
        if account != self.tracker.reserved_account() {
            return self.container_update(account, container, object);
        }

        let marker = match ExpiryMarker::parse(container, object) {
            Ok(marker) => marker,
            Err(error) => {
                tracing::error!("Ignoring expiry update {}/{}: {}", container, object, error);
                return ObjectResponse::Accepted;
            }
        };

        match op {
            UpdateOp::Put => {
                self.tracker
                    .schedule_expiry(
                        &marker.account,
                        &marker.container,
                        &marker.object,
                        marker.deadline,
                        timestamp,
                    )
                    .await;
            }
            UpdateOp::Delete => {
                self.tracker
                    .cancel_expiry(
                        &marker.account,
                        &marker.container,
                        &marker.object,
                        marker.deadline,
                        timestamp,
                    )
                    .await;
            }
        }

        ObjectResponse::Accepted
    }

    /// Durability belongs to the shared filesystem; there is nothing to
    /// replicate.
    pub fn replicate(&self) -> ObjectResponse {
        ObjectResponse::NotImplemented
    }
}

use crate::expiry::{ExpiryMarker, ExpiryTracker};
use crate::operations::{ObjectLocator, now_secs};
use crate::storage::{
    DELETE_AT_HEADER, DIRECTORY_CONTENT_TYPE, DiskFileManager, ObjectBody, ObjectMetadata,
    WriteOutcome, canonical_header_name,
};
use crate::timestamp::Timestamp;
use crate::{NasError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

// Header names owned by the metadata record itself.
const RESERVED_HEADERS: [&str; 4] = ["X-Timestamp", "Content-Type", "ETag", "Content-Length"];

#[derive(Clone)]
pub struct PutObjectOperation {
    locator: ObjectLocator,
    disk: Arc<DiskFileManager>,
    tracker: Arc<ExpiryTracker>,
}

pub struct PutObjectOperationRequest {
    pub account: String,
    pub container: String,
    pub object: String,
    pub timestamp: Timestamp,
    pub content_type: String,
    /// Expected MD5 of the body, verified before commit.
    pub etag: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: ObjectBody,
}

#[derive(Debug, Clone)]
pub struct PutObjectOperationResult {
    pub metadata: ObjectMetadata,
}

#[derive(Debug, Clone)]
pub enum PutObjectOperationOutcome {
    Committed(PutObjectOperationResult),
    /// An equal or newer entry already exists; it is returned unchanged.
    Stale(PutObjectOperationResult),
}

impl PutObjectOperation {
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

    pub async fn run(&self, request: PutObjectOperationRequest) -> Result<PutObjectOperationOutcome> {
        let PutObjectOperationRequest {
            account,
            container,
            object,
            timestamp,
            content_type,
            etag,
            headers,
            body,
        } = request;

        let mut metadata = ObjectMetadata::new(timestamp, content_type);
        metadata.etag = etag.unwrap_or_default();
        metadata.headers = headers
            .into_iter()
            .filter(|(name, _)| {
                !RESERVED_HEADERS
                    .iter()
                    .any(|reserved| reserved.eq_ignore_ascii_case(name))
            })
            .map(|(name, value)| (canonical_header_name(&name), value))
            .collect();

        let delete_at = metadata.delete_at()?;
        if let Some(deadline) = delete_at {
            if deadline <= now_secs() {
                return Err(NasError::InvalidRequest(format!(
                    "{} in past",
                    DELETE_AT_HEADER
                )));
            }
            self.tracker
                .validate_marker(&ExpiryMarker::new(&account, &container, &object, deadline))?;
        }

        let disk_file = self.locator.locate(&account, &container, &object).await?;
        let previous = self.disk.read_metadata(&disk_file).await?;

        let result = if metadata.content_type == DIRECTORY_CONTENT_TYPE {
            self.disk.put_dir(&disk_file, metadata).await?
        } else {
            self.disk.put(&disk_file, body, metadata).await?
        };

        if result.outcome == WriteOutcome::Stale {
            return Ok(PutObjectOperationOutcome::Stale(PutObjectOperationResult {
                metadata: result.metadata,
            }));
        }

        if let Some(deadline) = delete_at {
            self.tracker
                .schedule_expiry(&account, &container, &object, deadline, timestamp)
                .await;
        }

        let old_delete_at = previous.and_then(|old| old.delete_at().ok().flatten());
        if let Some(old_deadline) = old_delete_at {
            if Some(old_deadline) != delete_at {
                self.tracker
                    .cancel_expiry(&account, &container, &object, old_deadline, timestamp)
                    .await;
            }
        }

        tracing::debug!(
            "Put {}/{}/{} at {} on {}",
            account,
            container,
            object,
            timestamp,
            disk_file.device()
        );

        Ok(PutObjectOperationOutcome::Committed(PutObjectOperationResult {
            metadata: result.metadata,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestCluster, body_of};

    fn request(object: &str, secs: u64, headers: &[(&str, &str)]) -> PutObjectOperationRequest {
        PutObjectOperationRequest {
            account: "acct".to_string(),
            container: "cont".to_string(),
            object: object.to_string(),
            timestamp: Timestamp::from_secs(secs),
            content_type: "text/plain".to_string(),
            etag: None,
            headers: headers
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            body: Box::pin(body_of(b"payload")),
        }
    }

    async fn marker_exists(cluster: &TestCluster, object: &str, deadline: u64) -> bool {
        let marker = ExpiryMarker::new("acct", "cont", object, deadline);
        let disk_file = cluster.tracker().marker_file(&marker).await.unwrap();
        disk_file.path().exists()
    }

    #[tokio::test]
    async fn test_reserved_headers_are_not_overridden() {
        let cluster = TestCluster::new();
        let operation = cluster.put_operation();
        let outcome = operation
            .run(request(
                "obj",
                100,
                &[("content-type", "evil/type"), ("X-Object-Meta-Color", "red")],
            ))
            .await
            .unwrap();

        let PutObjectOperationOutcome::Committed(result) = outcome else {
            panic!("expected a committed put");
        };
        assert_eq!(result.metadata.content_type, "text/plain");
        assert_eq!(result.metadata.headers.len(), 1);
        assert_eq!(result.metadata.headers["X-Object-Meta-Color"], "red");
    }

    #[tokio::test]
    async fn test_delete_at_schedules_and_replaces_marker() {
        let cluster = TestCluster::new();
        let operation = cluster.put_operation();
        let first = now_secs() + 3600;
        let second = now_secs() + 7200;

        operation
            .run(request("obj", 100, &[(DELETE_AT_HEADER, &first.to_string())]))
            .await
            .unwrap();
        assert!(marker_exists(&cluster, "obj", first).await);

        operation
            .run(request("obj", 101, &[(DELETE_AT_HEADER, &second.to_string())]))
            .await
            .unwrap();
        assert!(marker_exists(&cluster, "obj", second).await);
        assert!(!marker_exists(&cluster, "obj", first).await);

        operation.run(request("obj", 102, &[])).await.unwrap();
        assert!(!marker_exists(&cluster, "obj", second).await);
    }

    #[tokio::test]
    async fn test_delete_at_in_past_is_rejected() {
        let cluster = TestCluster::new();
        let operation = cluster.put_operation();

        let result = operation
            .run(request("obj", 100, &[(DELETE_AT_HEADER, "1000")]))
            .await;
        assert!(matches!(result, Err(NasError::InvalidRequest(_))));

        let result = operation
            .run(request("obj", 100, &[(DELETE_AT_HEADER, "tomorrow")]))
            .await;
        assert!(matches!(result, Err(NasError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_delete_at_header_name_is_case_insensitive() {
        let cluster = TestCluster::new();
        let operation = cluster.put_operation();

        let result = operation
            .run(request("obj", 100, &[("x-delete-at", "5")]))
            .await;
        assert!(matches!(result, Err(NasError::InvalidRequest(_))));

        let deadline = now_secs() + 3600;
        let outcome = operation
            .run(request("obj", 101, &[("x-delete-at", &deadline.to_string())]))
            .await
            .unwrap();
        let PutObjectOperationOutcome::Committed(result) = outcome else {
            panic!("expected a committed put");
        };
        assert_eq!(result.metadata.headers[DELETE_AT_HEADER], deadline.to_string());
        assert!(marker_exists(&cluster, "obj", deadline).await);
    }

    #[tokio::test]
    async fn test_delete_at_rejected_when_marker_name_too_long() {
        let cluster = TestCluster::new();
        let operation = cluster.put_operation();
        let deadline = (now_secs() + 3600).to_string();
        let mut req = request("obj", 100, &[(DELETE_AT_HEADER, &deadline)]);
        req.account = "a".repeat(250);

        assert!(matches!(
            operation.run(req).await,
            Err(NasError::InvalidRequest(_))
        ));

        let mut req = request("obj", 100, &[]);
        req.account = "a".repeat(250);
        assert!(matches!(
            operation.run(req).await.unwrap(),
            PutObjectOperationOutcome::Committed(_)
        ));
    }

    #[tokio::test]
    async fn test_missing_expiry_device_does_not_fail_put() {
        let cluster = TestCluster::with_devices(&["sda"]);
        let operation = cluster.put_operation();
        let deadline = (now_secs() + 3600).to_string();

        let outcome = operation
            .run(request("obj", 100, &[(DELETE_AT_HEADER, &deadline)]))
            .await
            .unwrap();
        assert!(matches!(outcome, PutObjectOperationOutcome::Committed(_)));
    }

    #[tokio::test]
    async fn test_reserved_account_is_rejected() {
        let cluster = TestCluster::new();
        let operation = cluster.put_operation();
        let mut req = request("obj", 100, &[]);
        req.account = cluster.config().expiring_objects_account.clone();

        assert!(matches!(
            operation.run(req).await,
            Err(NasError::InvalidName { .. })
        ));
    }
}

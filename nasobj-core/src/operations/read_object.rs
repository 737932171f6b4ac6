use crate::operations::{ObjectLocator, now_secs};
use crate::storage::{DiskFileManager, ObjectBody, ObjectMetadata};
use crate::{NasError, Result};
use std::sync::Arc;

#[derive(Clone)]
pub struct ReadObjectOperation {
    locator: ObjectLocator,
    disk: Arc<DiskFileManager>,
}

#[derive(Debug, Clone)]
pub struct ReadObjectOperationRequest {
    pub account: String,
    pub container: String,
    pub object: String,
    pub include_body: bool,
}

pub struct ReadObjectOperationResult {
    pub metadata: ObjectMetadata,
    pub body: Option<ObjectBody>,
}

pub enum ReadObjectOperationOutcome {
    Found(ReadObjectOperationResult),
    NotFound,
    /// Present on disk but past its `X-Delete-At`; awaiting the sweeper.
    Expired,
}

impl ReadObjectOperation {
    pub fn new(locator: ObjectLocator, disk: Arc<DiskFileManager>) -> Self {
        Self { locator, disk }
    }

    pub async fn run(&self, request: ReadObjectOperationRequest) -> Result<ReadObjectOperationOutcome> {
        let ReadObjectOperationRequest {
            account,
            container,
            object,
            include_body,
        } = request;

        let disk_file = self.locator.locate(&account, &container, &object).await?;

        let (metadata, body) = if include_body {
            match self.disk.get(&disk_file).await {
                Ok(reader) => (reader.metadata, Some(reader.body)),
                Err(NasError::NotFound(_)) => return Ok(ReadObjectOperationOutcome::NotFound),
                Err(error) => return Err(error),
            }
        } else {
            match self.disk.read_metadata(&disk_file).await? {
                Some(metadata) => (metadata, None),
                None => return Ok(ReadObjectOperationOutcome::NotFound),
            }
        };

        if let Some(deadline) = metadata.delete_at().ok().flatten() {
            if deadline <= now_secs() {
                return Ok(ReadObjectOperationOutcome::Expired);
            }
        }

        Ok(ReadObjectOperationOutcome::Found(ReadObjectOperationResult {
            metadata,
            body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DELETE_AT_HEADER;
    use crate::test_support::{TestCluster, body_of};
    use crate::timestamp::Timestamp;

    fn request(object: &str, include_body: bool) -> ReadObjectOperationRequest {
        ReadObjectOperationRequest {
            account: "acct".to_string(),
            container: "cont".to_string(),
            object: object.to_string(),
            include_body,
        }
    }

    #[tokio::test]
    async fn test_read_with_and_without_body() {
        let cluster = TestCluster::new();
        let disk_file = cluster.locator().locate("acct", "cont", "obj").await.unwrap();
        let metadata = ObjectMetadata::new(Timestamp::from_secs(10), "text/plain");
        cluster
            .disk()
            .put(&disk_file, body_of(b"abc"), metadata)
            .await
            .unwrap();

        let operation = cluster.read_operation();
        let ReadObjectOperationOutcome::Found(found) =
            operation.run(request("obj", true)).await.unwrap()
        else {
            panic!("expected object");
        };
        assert!(found.body.is_some());
        assert_eq!(found.metadata.content_length, 3);

        let ReadObjectOperationOutcome::Found(head) =
            operation.run(request("obj", false)).await.unwrap()
        else {
            panic!("expected object");
        };
        assert!(head.body.is_none());
        assert_eq!(head.metadata, found.metadata);

        assert!(matches!(
            operation.run(request("missing", true)).await.unwrap(),
            ReadObjectOperationOutcome::NotFound
        ));
        assert!(matches!(
            operation.run(request("obj/under/file", false)).await.unwrap(),
            ReadObjectOperationOutcome::NotFound
        ));
    }

    #[tokio::test]
    async fn test_object_past_deadline_reads_as_expired() {
        let cluster = TestCluster::new();
        let disk_file = cluster.locator().locate("acct", "cont", "old").await.unwrap();
        // Written directly so the past deadline bypasses request validation.
        let metadata = ObjectMetadata::new(Timestamp::from_secs(10), "text/plain")
            .with_header(DELETE_AT_HEADER, "1000");
        cluster
            .disk()
            .put(&disk_file, body_of(b"abc"), metadata)
            .await
            .unwrap();

        let operation = cluster.read_operation();
        for include_body in [true, false] {
            assert!(matches!(
                operation.run(request("old", include_body)).await.unwrap(),
                ReadObjectOperationOutcome::Expired
            ));
        }
    }
}

use crate::config::Config;
use futures::StreamExt;
use nasobj_core::{
    AlwaysMounted, DeviceRecord, DiskFileManager, FsMountCheck, MountCheck, NasError, OBJECT_RING,
    ObjectMetadata, ObjectResponse, ObjectService, PutObjectOperationRequest, Result,
    RingResolver, Timestamp,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;

/// Ring placement of a name, as `swift-get-nodes` would print it.
#[derive(Debug, Serialize)]
pub struct NodesReport {
    pub account: String,
    pub container: Option<String>,
    pub object: Option<String>,
    pub partition: u32,
    pub devices: Vec<DeviceRecord>,
    /// Device holding the account's directory tree on the share.
    pub account_device: String,
    pub placement: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct ResponseReport {
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ObjectMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ObjectResponse> for ResponseReport {
    fn from(response: &ObjectResponse) -> Self {
        Self {
            status: response.status_code(),
            metadata: response.metadata().cloned(),
            error: response.reason().map(str::to_string),
        }
    }
}

pub struct PutArgs {
    pub account: String,
    pub container: String,
    pub object: String,
    /// `-` reads the body from stdin.
    pub source: String,
    pub content_type: String,
    pub etag: Option<String>,
    pub delete_at: Option<u64>,
    pub headers: Vec<String>,
    pub timestamp: Option<String>,
}

pub struct App {
    config: Config,
    ring: Arc<RingResolver>,
    service: ObjectService,
    reloader: JoinHandle<()>,
}

impl Drop for App {
    fn drop(&mut self) {
        self.reloader.abort();
    }
}

impl App {
    pub fn from_config(config: Config) -> Result<Self> {
        let storage = &config.storage;
        let ring = Arc::new(RingResolver::from_config(storage, &[OBJECT_RING])?);

        let checker: Arc<dyn MountCheck> = if storage.mount_check {
            Arc::new(FsMountCheck)
        } else {
            Arc::new(AlwaysMounted)
        };
        let disk = Arc::new(DiskFileManager::new(storage, checker));
        let service = ObjectService::new(Arc::clone(&ring), disk, storage);
        let reloader = ring.spawn_reloader();

        tracing::info!(
            "Devices: {}, rings: {}, mount_check: {}",
            storage.devices.display(),
            storage.swift_dir.display(),
            storage.mount_check
        );

        Ok(Self {
            config,
            ring,
            service,
            reloader,
        })
    }

    pub fn nodes(
        &self,
        account: &str,
        container: Option<&str>,
        object: Option<&str>,
    ) -> Result<NodesReport> {
        let (partition, devices) = self.ring.get_nodes(OBJECT_RING, account, container, object)?;
        let account_device = self.service.locator().device_for_account(account)?;

        let placement = match (container, object) {
            (Some(container), Some(object)) => {
                let root = self.config.storage.devices.join(&account_device);
                let mapper = nasobj_core::PathMapper::new(
                    self.config.storage.max_object_name_component_length,
                );
                Some(mapper.map(account, container, object, &root)?.path().to_path_buf())
            }
            _ => None,
        };

        Ok(NodesReport {
            account: account.to_string(),
            container: container.map(str::to_string),
            object: object.map(str::to_string),
            partition,
            devices,
            account_device,
            placement,
        })
    }

    pub async fn put(&self, args: PutArgs) -> Result<ResponseReport> {
        let mut headers = BTreeMap::new();
        for raw in &args.headers {
            let (name, value) = raw.split_once(':').ok_or_else(|| {
                NasError::InvalidRequest(format!("header '{}' is not 'Name: value'", raw))
            })?;
            headers.insert(name.trim().to_string(), value.trim().to_string());
        }
        if let Some(deadline) = args.delete_at {
            headers.insert(nasobj_core::DELETE_AT_HEADER.to_string(), deadline.to_string());
        }

        let body = if args.source == "-" {
            ReaderStream::new(tokio::io::stdin()).boxed()
        } else {
            ReaderStream::new(tokio::fs::File::open(&args.source).await?).boxed()
        };

        let request = PutObjectOperationRequest {
            account: args.account,
            container: args.container,
            object: args.object,
            timestamp: parse_timestamp(args.timestamp.as_deref())?,
            content_type: args.content_type,
            etag: args.etag,
            headers,
            body,
        };

        Ok(ResponseReport::from(&self.service.put(request).await))
    }

    /// Streams the body into `out`; the report describes the response.
    pub async fn get<W>(
        &self,
        account: &str,
        container: &str,
        object: &str,
        out: &mut W,
    ) -> Result<ResponseReport>
    where
        W: AsyncWrite + Unpin,
    {
        let response = self.service.get(account, container, object).await;
        let report = ResponseReport::from(&response);

        if let Some(mut body) = response.into_body() {
            while let Some(chunk) = body.next().await {
                out.write_all(&chunk?).await?;
            }
            out.flush().await?;
        }

        Ok(report)
    }

    pub async fn head(&self, account: &str, container: &str, object: &str) -> ResponseReport {
        ResponseReport::from(&self.service.head(account, container, object).await)
    }

    pub async fn delete(
        &self,
        account: &str,
        container: &str,
        object: &str,
        timestamp: Option<&str>,
    ) -> Result<ResponseReport> {
        let timestamp = parse_timestamp(timestamp)?;
        let response = self
            .service
            .delete(account, container, object, timestamp)
            .await;
        Ok(ResponseReport::from(&response))
    }

    pub async fn expire(
        &self,
        account: &str,
        container: &str,
        object: &str,
        deadline: u64,
    ) -> Result<ResponseReport> {
        let marker = nasobj_core::ExpiryMarker::new(account, container, object, deadline);
        self.service
            .tracker()
            .try_schedule_expiry(&marker, Timestamp::now())
            .await?;
        Ok(ResponseReport {
            status: 202,
            metadata: None,
            error: None,
        })
    }
}

/// Dumps the stored metadata of any entry on the share.
pub fn print_metadata(path: &Path) -> Result<ObjectMetadata> {
    nasobj_core::storage::read_metadata(path)?
        .ok_or_else(|| NasError::NotFound(format!("no object metadata on {}", path.display())))
}

fn parse_timestamp(raw: Option<&str>) -> Result<Timestamp> {
    match raw {
        Some(raw) => raw.parse(),
        None => Ok(Timestamp::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nasobj_core::{RingDescriptor, StorageConfig};

    fn device(id: u32, name: &str) -> DeviceRecord {
        DeviceRecord {
            id,
            zone: 1,
            weight: 1.0,
            ip: "10.0.0.1".to_string(),
            port: 6200,
            device_name: name.to_string(),
        }
    }

    fn app(root: &Path) -> App {
        let devices = root.join("node");
        for name in ["nas0", ".expiring_objects"] {
            std::fs::create_dir_all(devices.join(name)).unwrap();
        }
        RingDescriptor {
            part_power: 0,
            replica_count: 1,
            devs: vec![device(0, "nas0"), device(1, ".expiring_objects")],
            part2dev: vec![vec![0]],
        }
        .write_to(&root.join("object.ring.json"))
        .unwrap();

        App::from_config(Config {
            storage: StorageConfig {
                devices,
                swift_dir: root.to_path_buf(),
                mount_check: false,
                ..StorageConfig::default()
            },
        })
        .unwrap()
    }

    fn put_args(source: &Path, object: &str) -> PutArgs {
        PutArgs {
            account: "AUTH_test".to_string(),
            container: "docs".to_string(),
            object: object.to_string(),
            source: source.to_string_lossy().into_owned(),
            content_type: "text/plain".to_string(),
            etag: None,
            delete_at: None,
            headers: vec!["X-Object-Meta-Owner: ops".to_string()],
            timestamp: Some("1700000000.00000".to_string()),
        }
    }

    #[tokio::test]
    async fn test_put_get_head_delete() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let source = dir.path().join("report.txt");
        std::fs::write(&source, b"quarterly numbers").unwrap();

        let put = app.put(put_args(&source, "2024/q1.txt")).await.unwrap();
        assert_eq!(put.status, 201);

        let mut out = Vec::new();
        let got = app
            .get("AUTH_test", "docs", "2024/q1.txt", &mut out)
            .await
            .unwrap();
        assert_eq!(got.status, 200);
        assert_eq!(out, b"quarterly numbers");

        let head = app.head("AUTH_test", "docs", "2024/q1.txt").await;
        let metadata = head.metadata.unwrap();
        assert_eq!(metadata.headers["X-Object-Meta-Owner"], "ops");
        assert_eq!(metadata.timestamp, Timestamp::from_secs(1_700_000_000));

        let deleted = app
            .delete("AUTH_test", "docs", "2024/q1.txt", None)
            .await
            .unwrap();
        assert_eq!(deleted.status, 204);
        assert_eq!(app.head("AUTH_test", "docs", "2024/q1.txt").await.status, 404);
    }

    #[tokio::test]
    async fn test_nodes_and_print_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let source = dir.path().join("blob");
        std::fs::write(&source, b"x").unwrap();
        app.put(put_args(&source, "a/b")).await.unwrap();

        let report = app.nodes("AUTH_test", Some("docs"), Some("a/b")).unwrap();
        assert_eq!(report.partition, 0);
        assert_eq!(report.account_device, "nas0");
        let placement = report.placement.unwrap();
        assert!(placement.ends_with("AUTH_test/docs/a/b"));

        let metadata = print_metadata(&placement).unwrap();
        assert_eq!(metadata.content_length, 1);
        assert!(matches!(
            print_metadata(&source),
            Err(NasError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_bad_header_and_expire() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let source = dir.path().join("blob");
        std::fs::write(&source, b"x").unwrap();

        let mut args = put_args(&source, "obj");
        args.headers = vec!["no-colon".to_string()];
        assert!(matches!(
            app.put(args).await,
            Err(NasError::InvalidRequest(_))
        ));

        let report = app
            .expire("AUTH_test", "docs", "obj", 4_000_000_000)
            .await
            .unwrap();
        assert_eq!(report.status, 202);
    }
}

use crate::config::StorageConfig;
use crate::error::{NasError, Result};
use crate::placement::{CollisionDetector, EntryKind, PathMapper, PlacementPath};
use crate::storage::metadata::{
    DIRECTORY_CONTENT_TYPE, ObjectMetadata, read_metadata, read_metadata_from_file,
    write_metadata, write_metadata_to_file,
};
use crate::storage::os::{
    MountCheck, TempObject, create_temp_object, file_etag, not_found, prune_empty_dirs,
    reliable_mkdir_all,
};
use crate::storage::worker_pool::{DevicePools, DeviceQueue, PathLocks};
use crate::timestamp::Timestamp;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use md5::{Digest, Md5};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const EMPTY_ETAG: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// Lazy, finite, non-restartable object content.
pub type ObjectBody = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Committed,
    /// The entry already carries an equal or newer timestamp; nothing changed.
    Stale,
}

#[derive(Debug, Clone)]
pub struct PutResult {
    pub outcome: WriteOutcome,
    /// Metadata now on disk: the new entry's, or the newer existing one's.
    pub metadata: ObjectMetadata,
}

pub struct ObjectReader {
    pub metadata: ObjectMetadata,
    pub body: ObjectBody,
}

impl ObjectReader {
    pub async fn read_all(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.metadata.content_length as usize);
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

/// One object location on one device.
#[derive(Debug, Clone)]
pub struct DiskFile {
    device: String,
    placement: PlacementPath,
}

impl DiskFile {
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn placement(&self) -> &PlacementPath {
        &self.placement
    }

    pub fn path(&self) -> &Path {
        self.placement.path()
    }
}

/// Create, replace, read and delete object entries on the shared filesystem.
///
/// Writes go to a temporary sibling that carries its metadata before it is
/// renamed over the destination, so readers see either the old entry or the
/// complete new one. The final stale check and rename for a path run under
/// that path's lock.
pub struct DiskFileManager {
    devices: PathBuf,
    mount_check: bool,
    mount_check_timeout: Duration,
    mount_checker: Arc<dyn MountCheck>,
    mapper: PathMapper,
    chunk_size: usize,
    pools: DevicePools,
    locks: PathLocks,
}

impl DiskFileManager {
    pub fn new(config: &StorageConfig, mount_checker: Arc<dyn MountCheck>) -> Self {
        Self {
            devices: config.devices.clone(),
            mount_check: config.mount_check,
            mount_check_timeout: config.mount_check_timeout(),
            mount_checker,
            mapper: PathMapper::new(config.max_object_name_component_length),
            chunk_size: config.disk_chunk_size,
            pools: DevicePools::new(config.threads_per_disk),
            locks: PathLocks::new(),
        }
    }

    pub fn mapper(&self) -> &PathMapper {
        &self.mapper
    }

    pub fn mount_check_enabled(&self) -> bool {
        self.mount_check
    }

    /// Mount point for `device`, verified against the mount-check policy.
    pub async fn device_root(&self, device: &str) -> Result<PathBuf> {
        if device.is_empty() || device.contains('/') || device == "." || device == ".." {
            return Err(NasError::InvalidRequest(format!(
                "invalid device name '{}'",
                device
            )));
        }

        let root = self.devices.join(device);
        if !self.mount_check {
            return Ok(root);
        }

        let checker = Arc::clone(&self.mount_checker);
        let mount_point = root.clone();
        let mounted = self
            .pools
            .run_with_timeout(device, self.mount_check_timeout, move || {
                Ok(checker.is_mounted(&mount_point))
            })
            .await?;

        if !mounted {
            return Err(NasError::BackingStoreUnavailable(format!(
                "{} does not exist or is not a mount point",
                root.display()
            )));
        }

        Ok(root)
    }

    pub async fn disk_file(
        &self,
        device: &str,
        account: &str,
        container: &str,
        object: &str,
    ) -> Result<DiskFile> {
        if object.is_empty() {
            return Err(NasError::invalid_name(object, "object name cannot be empty"));
        }

        let root = self.device_root(device).await?;
        let placement = self.mapper.map(account, container, object, &root)?;
        Ok(DiskFile {
            device: device.to_string(),
            placement,
        })
    }

    pub async fn put<S>(
        &self,
        disk_file: &DiskFile,
        mut body: S,
        mut metadata: ObjectMetadata,
    ) -> Result<PutResult>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + Unpin,
    {
        let device = disk_file.device.as_str();
        let root = disk_file.placement.device_root().to_path_buf();
        let target = disk_file.path().to_path_buf();

        let (check_root, check_target) = (root.clone(), target.clone());
        let existing = self
            .pools
            .run(device, move || {
                CollisionDetector::check(&check_root, &check_target, EntryKind::File)?
                    .into_result()?;
                current_metadata(&check_target)
            })
            .await?;

        if let Some(existing) = existing {
            if existing.timestamp >= metadata.timestamp {
                tracing::debug!(
                    "Skipping stale put of {:?}: have {}, got {}",
                    target,
                    existing.timestamp,
                    metadata.timestamp
                );
                return Ok(PutResult {
                    outcome: WriteOutcome::Stale,
                    metadata: existing,
                });
            }
        }

        let queue = self.pools.queue(device);
        let (create_root, create_target) = (root.clone(), target.clone());
        let (temp, mut file) = queue
            .run(move || create_temp_object(&create_root, &create_target))
            .await?;

        let mut hasher = Md5::new();
        let mut length = 0u64;
        let mut pending = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            length += chunk.len() as u64;
            pending.extend_from_slice(&chunk);
            if pending.len() >= self.chunk_size {
                file = write_chunk(&queue, file, pending.split().freeze()).await?;
            }
        }

        let etag = hex::encode(hasher.finalize());
        if !metadata.etag.is_empty() && !metadata.etag.eq_ignore_ascii_case(&etag) {
            return Err(NasError::EtagMismatch {
                expected: metadata.etag,
                actual: etag,
            });
        }
        metadata.etag = etag;
        metadata.content_length = length;

        let (tail, stored) = (pending.freeze(), metadata.clone());
        let temp = queue
            .run(move || {
                let mut file = file;
                file.write_all(&tail)?;
                write_metadata_to_file(&file, &stored)?;
                file.sync_all()?;
                Ok(temp)
            })
            .await?;

        let _guard = self.locks.lock(&target).await;
        let (commit_root, commit_target) = (root, target.clone());
        let result = self
            .pools
            .run(device, move || {
                commit_file(temp, &commit_root, &commit_target, metadata)
            })
            .await?;

        if result.outcome == WriteOutcome::Committed {
            tracing::debug!(
                "Committed {:?} at {} ({} bytes)",
                target,
                result.metadata.timestamp,
                result.metadata.content_length
            );
        }
        Ok(result)
    }

    /// Creates a directory entry carrying metadata, or refreshes the metadata
    /// of an existing directory when the timestamp is newer.
    pub async fn put_dir(
        &self,
        disk_file: &DiskFile,
        mut metadata: ObjectMetadata,
    ) -> Result<PutResult> {
        metadata.content_type = DIRECTORY_CONTENT_TYPE.to_string();
        metadata.etag = EMPTY_ETAG.to_string();
        metadata.content_length = 0;

        let root = disk_file.placement.device_root().to_path_buf();
        let target = disk_file.path().to_path_buf();

        let _guard = self.locks.lock(&target).await;
        let dir_target = target.clone();
        self.pools
            .run(&disk_file.device, move || {
                CollisionDetector::check(&root, &dir_target, EntryKind::Directory)?
                    .into_result()?;

                if !create_dir_entry(&root, &dir_target)? {
                    if let Some(existing) = read_metadata(&dir_target)? {
                        if existing.timestamp >= metadata.timestamp {
                            return Ok(PutResult {
                                outcome: WriteOutcome::Stale,
                                metadata: existing,
                            });
                        }
                    }
                }

                write_metadata(&dir_target, &metadata)?;
                Ok(PutResult {
                    outcome: WriteOutcome::Committed,
                    metadata,
                })
            })
            .await
    }

    pub async fn get(&self, disk_file: &DiskFile) -> Result<ObjectReader> {
        let target = disk_file.path().to_path_buf();
        let queue = self.pools.queue(&disk_file.device);
        let (metadata, file) = queue.run(move || open_entry(&target)).await?;

        let body = match file {
            Some(file) => pooled_body(queue, file, self.chunk_size),
            None => stream::empty().boxed(),
        };

        Ok(ObjectReader { metadata, body })
    }

    pub async fn read_metadata(&self, disk_file: &DiskFile) -> Result<Option<ObjectMetadata>> {
        let target = disk_file.path().to_path_buf();
        self.pools
            .run(&disk_file.device, move || current_metadata(&target))
            .await
    }

    pub async fn delete(&self, disk_file: &DiskFile, timestamp: Timestamp) -> Result<WriteOutcome> {
        let target = disk_file.path().to_path_buf();
        let stop = disk_file
            .placement
            .container_dir()
            .unwrap_or_else(|| disk_file.placement.account_dir());

        let _guard = self.locks.lock(&target).await;
        let outcome = self
            .pools
            .run(&disk_file.device, move || {
                delete_entry(&target, &stop, timestamp)
            })
            .await?;

        if outcome == WriteOutcome::Committed {
            tracing::debug!("Deleted {:?} at {}", disk_file.path(), timestamp);
        }
        Ok(outcome)
    }
}

async fn write_chunk(queue: &DeviceQueue, file: File, chunk: Bytes) -> Result<File> {
    queue
        .run(move || {
            let mut file = file;
            file.write_all(&chunk)?;
            Ok(file)
        })
        .await
}

/// Streams `file` in `chunk_size` reads, each one under the device's queue.
fn pooled_body(queue: DeviceQueue, file: File, chunk_size: usize) -> ObjectBody {
    stream::try_unfold(file, move |file| {
        let queue = queue.clone();
        async move {
            let read = queue
                .run(move || {
                    let mut file = file;
                    let mut buf = vec![0u8; chunk_size];
                    let len = file.read(&mut buf)?;
                    buf.truncate(len);
                    Ok((file, buf))
                })
                .await;

            match read {
                Ok((_, buf)) if buf.is_empty() => Ok(None),
                Ok((file, buf)) => Ok(Some((Bytes::from(buf), file))),
                Err(NasError::Io(error)) => Err(error),
                Err(error) => Err(io::Error::other(error)),
            }
        }
    })
    .boxed()
}

/// Creates the directory for a directory object, along with any missing
/// ancestors. Returns false when a directory was already there. A parent
/// pruned by a concurrent delete between the two steps is recreated once.
fn create_dir_entry(root: &Path, target: &Path) -> Result<bool> {
    let parent = target
        .parent()
        .ok_or_else(|| NasError::Internal(format!("{:?} has no parent", target)))?;

    let mut retried = false;
    loop {
        reliable_mkdir_all(root, parent)?;
        match std::fs::create_dir(target) {
            Ok(()) => return Ok(true),
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                if !std::fs::metadata(target)?.is_dir() {
                    return Err(NasError::ExistsAsFile(target.to_path_buf()));
                }
                return Ok(false);
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound && !retried => {
                tracing::debug!("Parent of {:?} vanished before mkdir, retrying", target);
                retried = true;
            }
            Err(error) => {
                return Err(CollisionDetector::classify_error(
                    root,
                    target,
                    EntryKind::Directory,
                    error,
                ));
            }
        }
    }
}

fn is_missing(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

/// Metadata of whatever currently sits at `target`; `None` when nothing or
/// only a bare pseudo-directory is there. Blocking.
fn current_metadata(target: &Path) -> Result<Option<ObjectMetadata>> {
    match open_entry(target) {
        Ok((metadata, _)) => Ok(Some(metadata)),
        Err(NasError::NotFound(_)) => Ok(None),
        Err(error) => Err(error),
    }
}

fn open_entry(target: &Path) -> Result<(ObjectMetadata, Option<File>)> {
    let mut file = match File::open(target) {
        Ok(file) => file,
        Err(error) if is_missing(&error) => return Err(not_found(target)),
        Err(error) => return Err(error.into()),
    };

    let fs_meta = file.metadata()?;
    let stored = read_metadata_from_file(&file)?;

    if fs_meta.is_dir() {
        return match stored {
            Some(metadata) => Ok((metadata, None)),
            None => Err(not_found(target)),
        };
    }

    let metadata = match stored {
        Some(metadata) => metadata,
        None => {
            let etag = file_etag(&mut file)?;
            file.seek(SeekFrom::Start(0))?;
            ObjectMetadata::synthesize(&fs_meta, etag)
        }
    };

    Ok((metadata, Some(file)))
}

fn commit_file(
    temp: TempObject,
    root: &Path,
    target: &Path,
    metadata: ObjectMetadata,
) -> Result<PutResult> {
    match std::fs::metadata(target) {
        Ok(existing) if existing.is_dir() => {
            return Err(NasError::ExistsAsDir(target.to_path_buf()));
        }
        Ok(_) => {
            if let Some(existing) = read_metadata(target)? {
                if existing.timestamp >= metadata.timestamp {
                    return Ok(PutResult {
                        outcome: WriteOutcome::Stale,
                        metadata: existing,
                    });
                }
            }
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => {
            return Err(CollisionDetector::classify_error(
                root,
                target,
                EntryKind::File,
                error,
            ));
        }
    }

    temp.commit(target).map_err(|error| {
        CollisionDetector::classify_error(root, target, EntryKind::File, error)
    })?;

    Ok(PutResult {
        outcome: WriteOutcome::Committed,
        metadata,
    })
}

fn delete_entry(target: &Path, stop: &Path, timestamp: Timestamp) -> Result<WriteOutcome> {
    let fs_meta = match std::fs::metadata(target) {
        Ok(meta) => meta,
        Err(error) if is_missing(&error) => return Err(not_found(target)),
        Err(error) => return Err(error.into()),
    };

    let existing = read_metadata(target)?;
    if fs_meta.is_dir() && existing.is_none() {
        return Err(not_found(target));
    }

    if let Some(existing) = &existing {
        if existing.timestamp >= timestamp {
            return Ok(WriteOutcome::Stale);
        }
    }

    let removed = if fs_meta.is_dir() {
        std::fs::remove_dir(target)
    } else {
        std::fs::remove_file(target)
    };

    match removed {
        Ok(()) => {}
        Err(error) if is_missing(&error) => return Err(not_found(target)),
        Err(error) if error.kind() == io::ErrorKind::DirectoryNotEmpty => {
            return Err(NasError::DirectoryNotEmpty(target.to_path_buf()));
        }
        Err(error) => return Err(error.into()),
    }

    if let Some(parent) = target.parent() {
        prune_empty_dirs(parent, stop);
    }

    Ok(WriteOutcome::Committed)
}

use crate::config::StorageConfig;
use crate::expiry::ExpiryTracker;
use crate::operations::{
    DeleteObjectOperation, ObjectLocator, PutObjectOperation, ReadObjectOperation,
};
use crate::ring::{DeviceRecord, OBJECT_RING, RingDescriptor, RingResolver};
use crate::service::ObjectService;
use crate::storage::{AlwaysMounted, DiskFileManager, FsMountCheck, MountCheck};
use bytes::Bytes;
use futures::stream::{self, Iter};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub fn device_record(id: u32, name: &str) -> DeviceRecord {
    DeviceRecord {
        id,
        zone: 1,
        weight: 1.0,
        ip: "127.0.0.1".to_string(),
        port: 6200 + id as u16,
        device_name: name.to_string(),
    }
}

/// Ring with one partition replicated on every named device, in order.
pub fn single_partition_ring(names: &[&str]) -> RingDescriptor {
    RingDescriptor {
        part_power: 0,
        replica_count: names.len(),
        devs: names
            .iter()
            .enumerate()
            .map(|(id, name)| device_record(id as u32, name))
            .collect(),
        part2dev: vec![(0..names.len() as u32).collect()],
    }
}

pub fn local_config(devices: &Path) -> StorageConfig {
    StorageConfig {
        devices: devices.to_path_buf(),
        mount_check: false,
        ..StorageConfig::default()
    }
}

pub fn body_of(data: &'static [u8]) -> Iter<std::vec::IntoIter<io::Result<Bytes>>> {
    stream::iter(vec![Ok(Bytes::from_static(data))])
}

/// Devices and an object ring in a temp dir. `sda` is every tenant's primary.
pub struct TestCluster {
    _dir: TempDir,
    config: StorageConfig,
    ring: Arc<RingResolver>,
    disk: Arc<DiskFileManager>,
}

impl TestCluster {
    pub fn new() -> Self {
        Self::build(&["sda", ".expiring_objects"], false)
    }

    pub fn with_devices(names: &[&str]) -> Self {
        Self::build(names, false)
    }

    pub fn with_mount_check() -> Self {
        Self::build(&["sda", ".expiring_objects"], true)
    }

    fn build(names: &[&str], mount_check: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let devices = dir.path().join("node");
        let swift_dir = dir.path().join("swift");
        std::fs::create_dir_all(&swift_dir).unwrap();
        for name in names {
            std::fs::create_dir_all(devices.join(name)).unwrap();
        }

        single_partition_ring(names)
            .write_to(&swift_dir.join("object.ring.json"))
            .unwrap();

        let mut config = local_config(&devices);
        config.swift_dir = swift_dir;
        config.mount_check = mount_check;

        let checker: Arc<dyn MountCheck> = if mount_check {
            Arc::new(FsMountCheck)
        } else {
            Arc::new(AlwaysMounted)
        };

        let ring = Arc::new(RingResolver::from_config(&config, &[OBJECT_RING]).unwrap());
        let disk = Arc::new(DiskFileManager::new(&config, checker));

        Self {
            _dir: dir,
            config,
            ring,
            disk,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn devices(&self) -> PathBuf {
        self.config.devices.clone()
    }

    pub fn disk(&self) -> Arc<DiskFileManager> {
        Arc::clone(&self.disk)
    }

    pub fn locator(&self) -> ObjectLocator {
        ObjectLocator::new(Arc::clone(&self.ring), self.disk(), &self.config)
    }

    pub fn tracker(&self) -> Arc<ExpiryTracker> {
        Arc::new(ExpiryTracker::new(
            Arc::clone(&self.ring),
            self.disk(),
            &self.config,
        ))
    }

    pub fn put_operation(&self) -> PutObjectOperation {
        PutObjectOperation::new(self.locator(), self.disk(), self.tracker())
    }

    pub fn read_operation(&self) -> ReadObjectOperation {
        ReadObjectOperation::new(self.locator(), self.disk())
    }

    pub fn delete_operation(&self) -> DeleteObjectOperation {
        DeleteObjectOperation::new(self.locator(), self.disk(), self.tracker())
    }

    pub fn service(&self) -> ObjectService {
        ObjectService::new(Arc::clone(&self.ring), self.disk(), &self.config)
    }
}

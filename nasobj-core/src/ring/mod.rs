//! Consistent-hashing placement lookup.
//!
//! Rings are built by an external tool and shipped as JSON descriptors, one
//! per ring kind (`object`, `container`, `account`). This module only loads,
//! validates and queries them; partition assignment is never recomputed here.

pub mod handle;

pub use handle::{RingHandle, RingResolver};

use crate::error::{NasError, Result};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::SystemTime;

pub const OBJECT_RING: &str = "object";
pub const CONTAINER_RING: &str = "container";
pub const ACCOUNT_RING: &str = "account";

const MAX_PART_POWER: u8 = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: u32,
    pub zone: u32,
    pub weight: f64,
    pub ip: String,
    pub port: u16,
    #[serde(alias = "device")]
    pub device_name: String,
}

/// Serialized ring as produced by the ring builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingDescriptor {
    pub part_power: u8,
    pub replica_count: usize,
    pub devs: Vec<DeviceRecord>,
    /// Device ids per partition, in placement priority order.
    pub part2dev: Vec<Vec<u32>>,
}

impl RingDescriptor {
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|error| {
            NasError::RingLoad(format!("cannot read ring {}: {}", path.display(), error))
        })?;

        serde_json::from_slice(&bytes).map_err(|error| {
            NasError::RingLoad(format!("malformed ring {}: {}", path.display(), error))
        })
    }

    /// Writes the descriptor atomically so a concurrently reloading process
    /// never reads a truncated file.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let payload = serde_json::to_vec_pretty(self)?;
        let tmp_path = path.with_extension(format!("{}.tmp", ulid::Ulid::new()));
        std::fs::write(&tmp_path, payload)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

/// Validated, immutable ring.
#[derive(Debug)]
pub struct Ring {
    part_power: u8,
    replica_count: usize,
    devs: Vec<DeviceRecord>,
    dev_index: HashMap<u32, usize>,
    part2dev: Vec<Vec<u32>>,
    loaded_mtime: Option<SystemTime>,
}

impl Ring {
    pub fn from_descriptor(descriptor: RingDescriptor) -> Result<Self> {
        let RingDescriptor {
            part_power,
            replica_count,
            devs,
            part2dev,
        } = descriptor;

        if part_power > MAX_PART_POWER {
            return Err(NasError::RingLoad(format!(
                "partition power {} exceeds {}",
                part_power, MAX_PART_POWER
            )));
        }

        if replica_count == 0 {
            return Err(NasError::RingLoad(
                "replica count must be at least 1".to_string(),
            ));
        }

        let mut dev_index = HashMap::with_capacity(devs.len());
        for (index, dev) in devs.iter().enumerate() {
            if dev_index.insert(dev.id, index).is_some() {
                return Err(NasError::RingLoad(format!("duplicate device id {}", dev.id)));
            }
        }

        let expected_parts = 1u64 << part_power;
        if part2dev.len() as u64 != expected_parts {
            return Err(NasError::RingLoad(format!(
                "ring has {} partitions, partition power {} requires {}",
                part2dev.len(),
                part_power,
                expected_parts
            )));
        }

        for (part, dev_ids) in part2dev.iter().enumerate() {
            if dev_ids.len() != replica_count {
                return Err(NasError::RingLoad(format!(
                    "partition {} has {} devices, expected {}",
                    part,
                    dev_ids.len(),
                    replica_count
                )));
            }

            let mut seen = HashSet::with_capacity(dev_ids.len());
            for dev_id in dev_ids {
                if !dev_index.contains_key(dev_id) {
                    return Err(NasError::RingLoad(format!(
                        "partition {} references unknown device {}",
                        part, dev_id
                    )));
                }
                if !seen.insert(*dev_id) {
                    return Err(NasError::RingLoad(format!(
                        "partition {} lists device {} twice",
                        part, dev_id
                    )));
                }
            }
        }

        Ok(Self {
            part_power,
            replica_count,
            devs,
            dev_index,
            part2dev,
            loaded_mtime: None,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let loaded_mtime = std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok();
        let mut ring = Self::from_descriptor(RingDescriptor::from_file(path)?)?;
        ring.loaded_mtime = loaded_mtime;
        Ok(ring)
    }

    pub fn part_power(&self) -> u8 {
        self.part_power
    }

    pub fn replica_count(&self) -> usize {
        self.replica_count
    }

    pub fn partition_count(&self) -> usize {
        self.part2dev.len()
    }

    pub fn devices(&self) -> &[DeviceRecord] {
        &self.devs
    }

    pub fn loaded_mtime(&self) -> Option<SystemTime> {
        self.loaded_mtime
    }

    pub fn has_device(&self, device_name: &str) -> bool {
        self.devs.iter().any(|dev| dev.device_name == device_name)
    }

    pub fn partition(&self, hash: u32) -> u32 {
        (u64::from(hash) >> (u32::from(MAX_PART_POWER - self.part_power))) as u32
    }

    /// Devices for a partition, unmodified and in priority order.
    pub fn nodes(&self, partition: u32) -> Vec<DeviceRecord> {
        self.part2dev
            .get(partition as usize)
            .map(|dev_ids| {
                dev_ids
                    .iter()
                    .filter_map(|id| self.dev_index.get(id))
                    .map(|index| self.devs[*index].clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Salted path hash shared by every node of a cluster.
#[derive(Debug, Clone, Default)]
pub struct PathHasher {
    prefix: String,
    suffix: String,
}

impl PathHasher {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    pub fn ring_path(
        account: &str,
        container: Option<&str>,
        object: Option<&str>,
    ) -> Result<String> {
        if account.is_empty() {
            return Err(NasError::invalid_name(account, "account cannot be empty"));
        }

        let mut path = format!("/{}", account);
        match (container, object) {
            (None, Some(_)) => {
                return Err(NasError::InvalidRequest(
                    "object hashing requires a container".to_string(),
                ));
            }
            (Some(container), object) => {
                path.push('/');
                path.push_str(container);
                if let Some(object) = object {
                    path.push('/');
                    path.push_str(object);
                }
            }
            (None, None) => {}
        }

        Ok(path)
    }

    /// Top 32 bits (big endian) of `md5(prefix + path + suffix)`.
    pub fn hash(&self, path: &str) -> u32 {
        let mut hasher = Md5::new();
        hasher.update(self.prefix.as_bytes());
        hasher.update(path.as_bytes());
        hasher.update(self.suffix.as_bytes());
        let digest = hasher.finalize();
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }
}

use crate::error::{NasError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_COMPONENT_LENGTH: usize = 255;
pub const DEFAULT_EXPIRING_OBJECTS_ACCOUNT: &str = ".expiring_objects";

/// Storage-node settings shared by the ring, disk file and expiry layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one mount point per device name.
    #[serde(default = "default_devices")]
    pub devices: PathBuf,

    /// Directory holding `<ring_name>.ring.json` descriptors.
    #[serde(default = "default_swift_dir")]
    pub swift_dir: PathBuf,

    #[serde(default = "default_true")]
    pub mount_check: bool,

    #[serde(default = "default_mount_check_timeout_ms")]
    pub mount_check_timeout_ms: u64,

    #[serde(default = "default_max_component_length")]
    pub max_object_name_component_length: usize,

    #[serde(default = "default_expiring_objects_account")]
    pub expiring_objects_account: String,

    #[serde(default = "default_expiring_objects_container_divisor")]
    pub expiring_objects_container_divisor: u64,

    #[serde(default = "default_threads_per_disk")]
    pub threads_per_disk: usize,

    #[serde(default = "default_disk_chunk_size")]
    pub disk_chunk_size: usize,

    #[serde(default = "default_ring_reload_interval_secs")]
    pub ring_reload_interval_secs: u64,

    #[serde(default)]
    pub hash_path_prefix: String,

    #[serde(default)]
    pub hash_path_suffix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            devices: default_devices(),
            swift_dir: default_swift_dir(),
            mount_check: true,
            mount_check_timeout_ms: default_mount_check_timeout_ms(),
            max_object_name_component_length: default_max_component_length(),
            expiring_objects_account: default_expiring_objects_account(),
            expiring_objects_container_divisor: default_expiring_objects_container_divisor(),
            threads_per_disk: default_threads_per_disk(),
            disk_chunk_size: default_disk_chunk_size(),
            ring_reload_interval_secs: default_ring_reload_interval_secs(),
            hash_path_prefix: String::new(),
            hash_path_suffix: String::new(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_object_name_component_length == 0 {
            return Err(NasError::Config(
                "max_object_name_component_length must be positive".to_string(),
            ));
        }

        if self.expiring_objects_account.trim().is_empty()
            || self.expiring_objects_account.contains('/')
        {
            return Err(NasError::Config(format!(
                "invalid expiring_objects_account '{}'",
                self.expiring_objects_account
            )));
        }

        if self.expiring_objects_container_divisor == 0 {
            return Err(NasError::Config(
                "expiring_objects_container_divisor must be positive".to_string(),
            ));
        }

        if self.threads_per_disk == 0 {
            return Err(NasError::Config(
                "threads_per_disk must be positive".to_string(),
            ));
        }

        if self.disk_chunk_size == 0 {
            return Err(NasError::Config(
                "disk_chunk_size must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn mount_check_timeout(&self) -> Duration {
        Duration::from_millis(self.mount_check_timeout_ms)
    }

    pub fn ring_reload_interval(&self) -> Duration {
        Duration::from_secs(self.ring_reload_interval_secs)
    }
}

fn default_devices() -> PathBuf {
    PathBuf::from("/srv/node")
}

fn default_swift_dir() -> PathBuf {
    PathBuf::from("/etc/swift")
}

fn default_true() -> bool {
    true
}

fn default_mount_check_timeout_ms() -> u64 {
    2000
}

fn default_max_component_length() -> usize {
    DEFAULT_MAX_COMPONENT_LENGTH
}

fn default_expiring_objects_account() -> String {
    DEFAULT_EXPIRING_OBJECTS_ACCOUNT.to_string()
}

fn default_expiring_objects_container_divisor() -> u64 {
    86400
}

fn default_threads_per_disk() -> usize {
    4
}

fn default_disk_chunk_size() -> usize {
    64 * 1024
}

fn default_ring_reload_interval_secs() -> u64 {
    15
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config: StorageConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.devices, PathBuf::from("/srv/node"));
        assert!(config.mount_check);
        assert_eq!(config.max_object_name_component_length, 255);
        assert_eq!(config.expiring_objects_account, ".expiring_objects");
        assert_eq!(config.expiring_objects_container_divisor, 86400);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_reserved_account() {
        let config = StorageConfig {
            expiring_objects_account: "a/b".to_string(),
            ..StorageConfig::default()
        };
        assert!(matches!(config.validate(), Err(NasError::Config(_))));
    }
}

use nasobj_core::{NasError, Result, StorageConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Loads `path` (any format the `config` crate recognises by extension),
    /// then applies `NASOBJ_STORAGE__*` environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(
                ::config::Environment::with_prefix("NASOBJ")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| NasError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| NasError::Config(e.to_string()))?;

        config.storage.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_file_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nasobj.yaml");
        std::fs::write(
            &path,
            "storage:\n  devices: /mnt/nas\n  mount_check: false\n  hash_path_suffix: secret\n",
        )
        .unwrap();

        let config = Config::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.storage.devices, std::path::PathBuf::from("/mnt/nas"));
        assert!(!config.storage.mount_check);
        assert_eq!(config.storage.hash_path_suffix, "secret");
        assert_eq!(config.storage.max_object_name_component_length, 255);
        assert_eq!(config.storage.expiring_objects_account, ".expiring_objects");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nasobj.yaml");
        std::fs::write(&path, "storage:\n  threads_per_disk: 0\n").unwrap();
        assert!(matches!(
            Config::from_file(path.to_str().unwrap()),
            Err(NasError::Config(_))
        ));

        assert!(matches!(
            Config::from_file(dir.path().join("missing.yaml").to_str().unwrap()),
            Err(NasError::Config(_))
        ));
    }
}

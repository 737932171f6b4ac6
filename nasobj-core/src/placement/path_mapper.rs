use crate::config::DEFAULT_MAX_COMPONENT_LENGTH;
use crate::error::{NasError, Result};
use md5::{Digest, Md5};
use std::path::{Component, Path, PathBuf};

const ACCOUNT_PREFIX_LEN: usize = 2;

/// Location of an account, container or object below a device mount point:
/// `device_root/{account_hash_prefix}/{account}/{container}/{object...}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementPath {
    device_root: PathBuf,
    account: String,
    container: String,
    object: String,
    path: PathBuf,
}

impl PlacementPath {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn device_root(&self) -> &Path {
        &self.device_root
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    pub fn is_object(&self) -> bool {
        !self.object.is_empty()
    }

    pub fn account_dir(&self) -> PathBuf {
        self.device_root
            .join(account_hash_prefix(&self.account))
            .join(&self.account)
    }

    pub fn container_dir(&self) -> Option<PathBuf> {
        if self.container.is_empty() {
            None
        } else {
            Some(self.account_dir().join(&self.container))
        }
    }
}

/// Maps names to placement paths; the component length limit is fixed at
/// construction.
#[derive(Debug, Clone)]
pub struct PathMapper {
    max_component_length: usize,
}

impl Default for PathMapper {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_COMPONENT_LENGTH)
    }
}

impl PathMapper {
    pub fn new(max_component_length: usize) -> Self {
        Self {
            max_component_length,
        }
    }

    pub fn max_component_length(&self) -> usize {
        self.max_component_length
    }

    pub fn validate_component(&self, component: &str) -> Result<()> {
        if component.is_empty() {
            return Err(NasError::invalid_name(
                component,
                "cannot begin, end, or have contiguous /'s",
            ));
        }
        if component.len() > self.max_component_length {
            return Err(NasError::invalid_name(
                component,
                format!("too long ({})", component.len()),
            ));
        }
        if component == "." || component == ".." {
            return Err(NasError::invalid_name(component, "cannot be . or .."));
        }
        Ok(())
    }

    pub fn validate_object_name(&self, object_name: &str) -> Result<()> {
        for component in object_name.split('/') {
            self.validate_component(component)?;
        }
        Ok(())
    }

    fn validate_single(&self, kind: &str, name: &str) -> Result<()> {
        self.validate_component(name)?;
        if name.contains('/') {
            return Err(NasError::invalid_name(
                name,
                format!("{} cannot contain /", kind),
            ));
        }
        Ok(())
    }

    pub fn map(
        &self,
        account: &str,
        container: &str,
        object_name: &str,
        device_root: &Path,
    ) -> Result<PlacementPath> {
        if !device_root.is_absolute() {
            return Err(NasError::InvalidRequest(format!(
                "device root {:?} is not absolute",
                device_root
            )));
        }

        if account.is_empty() {
            return Err(NasError::invalid_name(account, "account cannot be empty"));
        }
        self.validate_single("account", account)?;

        let mut path = device_root.join(account_hash_prefix(account)).join(account);

        if container.is_empty() {
            if !object_name.is_empty() {
                return Err(NasError::invalid_name(
                    container,
                    "container cannot be empty for an object",
                ));
            }
        } else {
            self.validate_single("container", container)?;
            path.push(container);
        }

        if !object_name.is_empty() {
            self.validate_object_name(object_name)?;
            for component in object_name.split('/') {
                path.push(component);
            }
        }

        Ok(PlacementPath {
            device_root: device_root.to_path_buf(),
            account: account.to_string(),
            container: container.to_string(),
            object: object_name.to_string(),
            path,
        })
    }

    /// Inverse of [`PathMapper::map`].
    pub fn split(&self, device_root: &Path, path: &Path) -> Result<(String, String, String)> {
        let relative = path.strip_prefix(device_root).map_err(|_| {
            NasError::InvalidRequest(format!("{:?} is not below {:?}", path, device_root))
        })?;

        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str().ok_or_else(|| {
                    NasError::InvalidRequest(format!("non UTF-8 component in {:?}", path))
                })?),
                _ => {
                    return Err(NasError::InvalidRequest(format!(
                        "unexpected component in {:?}",
                        path
                    )));
                }
            }
        }

        if parts.len() < 2 {
            return Err(NasError::InvalidRequest(format!(
                "{:?} does not name an account",
                path
            )));
        }

        let account = parts[1].to_string();
        if parts[0] != account_hash_prefix(&account) {
            return Err(NasError::InvalidRequest(format!(
                "account prefix mismatch in {:?}",
                path
            )));
        }

        let container = parts.get(2).map(|part| part.to_string()).unwrap_or_default();
        let object = if parts.len() > 3 {
            parts[3..].join("/")
        } else {
            String::new()
        };

        Ok((account, container, object))
    }
}

/// Two hex characters of the account name's MD5, spreading accounts over 256
/// top-level directories per device.
pub fn account_hash_prefix(account: &str) -> String {
    let digest = Md5::digest(account.as_bytes());
    hex::encode(digest)[..ACCOUNT_PREFIX_LEN].to_string()
}

use crate::error::{NasError, Result};
use crate::placement::{CollisionDetector, EntryKind};
use crate::storage::metadata::read_metadata;
use md5::{Digest, Md5};
use std::fs::File;
use std::io::{self, Read};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Mount-point predicate consulted before a device root is trusted.
pub trait MountCheck: Send + Sync {
    fn is_mounted(&self, path: &Path) -> bool;
}

/// A path is a mount point when it is a real directory whose device differs
/// from its parent's, or which is its own parent.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsMountCheck;

impl MountCheck for FsMountCheck {
    fn is_mounted(&self, path: &Path) -> bool {
        let meta = match std::fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(_) => return false,
        };
        if !meta.is_dir() {
            return false;
        }

        let parent = match std::fs::metadata(path.join("..")) {
            Ok(parent) => parent,
            Err(_) => return false,
        };

        meta.dev() != parent.dev() || meta.ino() == parent.ino()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysMounted;

impl MountCheck for AlwaysMounted {
    fn is_mounted(&self, _path: &Path) -> bool {
        true
    }
}

/// Creates `dir` and its ancestors below `root`. Directories that already
/// exist, including ones created by a racing writer, are fine. A file in the
/// way becomes `ExistsAsFile`; any other failure is retried once.
pub fn reliable_mkdir_all(root: &Path, dir: &Path) -> Result<()> {
    let first = match std::fs::create_dir_all(dir) {
        Ok(()) => return Ok(()),
        Err(error) => error,
    };

    let classified = CollisionDetector::classify_error(root, dir, EntryKind::Directory, first);
    if classified.is_conflict() {
        return Err(classified);
    }

    tracing::debug!("Retrying mkdir of {:?} after: {}", dir, classified);
    std::fs::create_dir_all(dir)
        .map_err(|error| CollisionDetector::classify_error(root, dir, EntryKind::Directory, error))
}

/// Creates the temporary sibling of `target`, making missing ancestors on
/// demand. A concurrent prune can remove a freshly made parent before the
/// create lands; the mkdir and create are then retried once.
pub fn create_temp_object(root: &Path, target: &Path) -> Result<(TempObject, File)> {
    let parent = target
        .parent()
        .ok_or_else(|| NasError::Internal(format!("{:?} has no parent", target)))?;
    let classify =
        |error: io::Error| CollisionDetector::classify_error(root, target, EntryKind::File, error);

    match TempObject::create(target) {
        Ok(created) => return Ok(created),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => return Err(classify(error)),
    }

    let mut retried = false;
    loop {
        reliable_mkdir_all(root, parent)?;
        match TempObject::create(target) {
            Ok(created) => return Ok(created),
            Err(error) if error.kind() == io::ErrorKind::NotFound && !retried => {
                tracing::debug!("Parent of {:?} vanished before create, retrying", target);
                retried = true;
            }
            Err(error) => return Err(classify(error)),
        }
    }
}

/// Removes now-empty directories from `start` upwards, stopping before `stop`
/// or at the first directory that is non-empty or carries object metadata.
/// Failures, including unreadable metadata, end the walk quietly.
pub fn prune_empty_dirs(start: &Path, stop: &Path) {
    let mut current = start.to_path_buf();
    while current.starts_with(stop) && current != stop {
        if !matches!(read_metadata(&current), Ok(None)) {
            break;
        }
        if std::fs::remove_dir(&current).is_err() {
            break;
        }
        tracing::debug!("Pruned empty directory {:?}", current);
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }
}

/// Temporary sibling of an object being written.
///
/// The file is removed when the guard drops unless [`TempObject::commit`]
/// renamed it into place first, so aborted or cancelled writes leave
/// nothing behind.
#[derive(Debug)]
pub struct TempObject {
    path: PathBuf,
    committed: bool,
}

impl TempObject {
    /// Exclusively creates `.{leaf}.{ulid}.tmp` next to `target`.
    pub fn create(target: &Path) -> io::Result<(Self, File)> {
        let parent = target.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "object path has no parent")
        })?;
        let leaf = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        // Short leaf prefix keeps the temp name within NAME_MAX.
        let leaf_prefix: String = leaf.chars().take(32).collect();
        let path = parent.join(format!(".{}.{}.tmp", leaf_prefix, ulid::Ulid::new()));

        let file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;

        Ok((
            Self {
                path,
                committed: false,
            },
            file,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn commit(mut self, target: &Path) -> io::Result<()> {
        std::fs::rename(&self.path, target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for TempObject {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(error) = std::fs::remove_file(&self.path) {
                if error.kind() != io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove temp file {:?}: {}", self.path, error);
                }
            }
        }
    }
}

/// MD5 hex digest of a whole file, read in fixed-size chunks.
pub fn file_etag(file: &mut File) -> io::Result<String> {
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn not_found(path: &Path) -> NasError {
    NasError::NotFound(path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mkdir_is_idempotent_and_detects_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b/c");
        reliable_mkdir_all(dir.path(), &target).unwrap();
        reliable_mkdir_all(dir.path(), &target).unwrap();
        assert!(target.is_dir());

        std::fs::write(dir.path().join("a/file"), b"x").unwrap();
        let result = reliable_mkdir_all(dir.path(), &dir.path().join("a/file/deeper"));
        assert!(matches!(result, Err(NasError::ExistsAsFile(path)) if path == dir.path().join("a/file")));
    }

    #[test]
    fn test_prune_stops_at_boundary_and_non_empty() {
        let dir = tempfile::tempdir().unwrap();
        let stop = dir.path().join("cont");
        std::fs::create_dir_all(stop.join("x/y/z")).unwrap();
        std::fs::write(stop.join("x/keep"), b"1").unwrap();

        prune_empty_dirs(&stop.join("x/y/z"), &stop);
        assert!(!stop.join("x/y").exists());
        assert!(stop.join("x").exists());
        assert!(stop.exists());

        std::fs::create_dir_all(stop.join("solo")).unwrap();
        prune_empty_dirs(&stop.join("solo"), &stop);
        assert!(!stop.join("solo").exists());
        assert!(stop.exists());
    }

    #[test]
    fn test_temp_object_removed_unless_committed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("obj");

        let (temp, _file) = TempObject::create(&target).unwrap();
        let temp_path = temp.path().to_path_buf();
        assert!(temp_path.exists());
        drop(temp);
        assert!(!temp_path.exists());

        let (temp, _file) = TempObject::create(&target).unwrap();
        temp.commit(&target).unwrap();
        assert!(target.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_create_temp_object_makes_missing_parents() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("acct/cont/deep/obj");

        let (temp, _file) = create_temp_object(dir.path(), &target).unwrap();
        assert_eq!(temp.path().parent(), target.parent());
        assert!(temp.path().exists());

        std::fs::write(dir.path().join("acct/blocker"), b"x").unwrap();
        let blocked = create_temp_object(dir.path(), &dir.path().join("acct/blocker/obj"));
        assert!(matches!(blocked, Err(NasError::ExistsAsFile(_))));
    }

    #[test]
    fn test_file_etag_matches_md5() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obj");
        std::fs::write(&path, b"hello").unwrap();
        let mut file = File::open(&path).unwrap();
        assert_eq!(
            file_etag(&mut file).unwrap(),
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[test]
    fn test_mount_checks() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AlwaysMounted.is_mounted(dir.path()));
        assert!(!FsMountCheck.is_mounted(&dir.path().join("missing")));
        assert!(FsMountCheck.is_mounted(Path::new("/")));
    }
}

use crate::error::NasError;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Outcome of a collision check. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictRecord {
    NoConflict,
    /// A plain file sits where a directory is needed.
    ExistsAsFile(PathBuf),
    /// A directory sits where a file is needed.
    ExistsAsDir(PathBuf),
}

impl ConflictRecord {
    pub fn is_conflict(&self) -> bool {
        !matches!(self, ConflictRecord::NoConflict)
    }

    pub fn into_result(self) -> Result<(), NasError> {
        match self {
            ConflictRecord::NoConflict => Ok(()),
            ConflictRecord::ExistsAsFile(path) => Err(NasError::ExistsAsFile(path)),
            ConflictRecord::ExistsAsDir(path) => Err(NasError::ExistsAsDir(path)),
        }
    }
}

/// Detects file/directory name collisions along a target's ancestry.
///
/// A check is advisory: the caller's exclusive create or rename decides the
/// race, and its failure is passed back through [`CollisionDetector::classify_error`]
/// so the loser still sees a deterministic conflict.
pub struct CollisionDetector;

impl CollisionDetector {
    /// Walks `target` below `root` one component at a time. Blocking.
    pub fn check(root: &Path, target: &Path, intended: EntryKind) -> io::Result<ConflictRecord> {
        let relative = target.strip_prefix(root).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{:?} is not below {:?}", target, root),
            )
        })?;

        let components: Vec<_> = relative.components().collect();
        let mut current = root.to_path_buf();

        for (index, component) in components.iter().enumerate() {
            current.push(component);
            let is_leaf = index + 1 == components.len();

            let meta = match std::fs::metadata(&current) {
                Ok(meta) => meta,
                Err(error) if error.kind() == io::ErrorKind::NotFound => {
                    return Ok(ConflictRecord::NoConflict);
                }
                Err(error) if error.kind() == io::ErrorKind::NotADirectory => {
                    // A concurrent writer replaced an ancestor after we passed it.
                    return Ok(ConflictRecord::ExistsAsFile(
                        current.parent().unwrap_or(root).to_path_buf(),
                    ));
                }
                Err(error) => return Err(error),
            };

            if !is_leaf {
                if !meta.is_dir() {
                    return Ok(ConflictRecord::ExistsAsFile(current));
                }
                continue;
            }

            return Ok(match intended {
                EntryKind::File if meta.is_dir() => ConflictRecord::ExistsAsDir(current),
                EntryKind::Directory if !meta.is_dir() => ConflictRecord::ExistsAsFile(current),
                _ => ConflictRecord::NoConflict,
            });
        }

        Ok(ConflictRecord::NoConflict)
    }

    /// Turns a failed create, mkdir or rename into a conflict when the
    /// filesystem now shows one, otherwise keeps the I/O error.
    pub fn classify_error(
        root: &Path,
        target: &Path,
        intended: EntryKind,
        error: io::Error,
    ) -> NasError {
        match Self::check(root, target, intended) {
            Ok(ConflictRecord::ExistsAsFile(path)) => NasError::ExistsAsFile(path),
            Ok(ConflictRecord::ExistsAsDir(path)) => NasError::ExistsAsDir(path),
            _ => NasError::Io(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_conflict_on_fresh_tree() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b/c");
        assert_eq!(
            CollisionDetector::check(dir.path(), &target, EntryKind::File).unwrap(),
            ConflictRecord::NoConflict
        );
        assert_eq!(
            CollisionDetector::check(dir.path(), &target, EntryKind::Directory).unwrap(),
            ConflictRecord::NoConflict
        );
    }

    #[test]
    fn test_file_ancestor_blocks_nested_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/b"), b"object").unwrap();

        for kind in [EntryKind::File, EntryKind::Directory] {
            let record =
                CollisionDetector::check(dir.path(), &dir.path().join("a/b/c/d"), kind).unwrap();
            assert_eq!(record, ConflictRecord::ExistsAsFile(dir.path().join("a/b")));
        }
    }

    #[test]
    fn test_leaf_kind_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/dir")).unwrap();
        std::fs::write(dir.path().join("a/file"), b"object").unwrap();

        assert_eq!(
            CollisionDetector::check(dir.path(), &dir.path().join("a/dir"), EntryKind::File)
                .unwrap(),
            ConflictRecord::ExistsAsDir(dir.path().join("a/dir"))
        );
        assert_eq!(
            CollisionDetector::check(
                dir.path(),
                &dir.path().join("a/file"),
                EntryKind::Directory
            )
            .unwrap(),
            ConflictRecord::ExistsAsFile(dir.path().join("a/file"))
        );
        assert!(
            !CollisionDetector::check(dir.path(), &dir.path().join("a/file"), EntryKind::File)
                .unwrap()
                .is_conflict()
        );
        assert!(
            !CollisionDetector::check(
                dir.path(),
                &dir.path().join("a/dir"),
                EntryKind::Directory
            )
            .unwrap()
            .is_conflict()
        );
    }

    #[test]
    fn test_classify_error_prefers_conflict() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blocker"), b"x").unwrap();

        let error = std::fs::create_dir_all(dir.path().join("blocker/child")).unwrap_err();
        let classified = CollisionDetector::classify_error(
            dir.path(),
            &dir.path().join("blocker/child"),
            EntryKind::Directory,
            error,
        );
        assert!(matches!(classified, NasError::ExistsAsFile(path) if path == dir.path().join("blocker")));

        let plain = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let classified = CollisionDetector::classify_error(
            dir.path(),
            &dir.path().join("free"),
            EntryKind::File,
            plain,
        );
        assert!(matches!(classified, NasError::Io(_)));
    }
}

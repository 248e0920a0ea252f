//! Removal of a single delete target.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::core::errors::{Result, RetentionError};

/// Remove `path` (recursively when `is_dir`). A path that is already gone
/// counts as removed. Symlinks are refused at the last moment even though the
/// scanner already blocks them, since the entry may have been swapped since.
pub fn delete_target(path: &Path, is_dir: bool) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(RetentionError::io(path, err)),
    };
    if meta.file_type().is_symlink() {
        return Err(RetentionError::SafetyVeto {
            path: path.to_path_buf(),
            reason: "refusing to delete through a symlink".to_string(),
        });
    }
    if meta.is_dir() != is_dir {
        return Err(RetentionError::SafetyVeto {
            path: path.to_path_buf(),
            reason: "entry type changed since scan".to_string(),
        });
    }

    let removed = if is_dir {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match removed {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(RetentionError::io(path, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_file_and_tree() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.zip");
        fs::write(&file, b"x").unwrap();
        delete_target(&file, false).unwrap();
        assert!(!file.exists());

        let tree = dir.path().join("world");
        fs::create_dir_all(tree.join("region")).unwrap();
        fs::write(tree.join("region").join("r.mca"), b"x").unwrap();
        delete_target(&tree, true).unwrap();
        assert!(!tree.exists());
    }

    #[test]
    fn missing_path_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        delete_target(&dir.path().join("gone.zip"), false).unwrap();
        delete_target(&dir.path().join("gone"), true).unwrap();
    }

    #[test]
    fn type_mismatch_is_vetoed() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("now_a_dir.zip");
        fs::create_dir(&sub).unwrap();
        let err = delete_target(&sub, false).unwrap_err();
        assert_eq!(err.code(), "WRT-2003");
        assert!(sub.exists());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_is_vetoed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("real");
        fs::create_dir(&target).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();
        let err = delete_target(&link, true).unwrap_err();
        assert_eq!(err.code(), "WRT-2003");
        assert!(target.exists());
    }
}

//! Shared path helpers: absolute resolution, containment, and overlap checks.

use std::env;
use std::path::{Component, Path, PathBuf};

/// Resolve a path to an absolute, normalized path.
///
/// Existing paths go through `fs::canonicalize` (symlinks resolved). Paths
/// that do not exist are made absolute against the CWD and normalized
/// syntactically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

/// True when `path` equals `root` or lies underneath it (component-wise).
#[must_use]
pub fn is_within(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}

/// True when either path equals, contains, or is contained by the other.
#[must_use]
pub fn paths_overlap(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

/// Drop a trailing separator so `"/srv/backups/"` and `"/srv/backups"` compare equal.
#[must_use]
pub fn strip_trailing_separator(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    if raw.len() > 1
        && let Some(stripped) = raw.strip_suffix('/')
    {
        return PathBuf::from(stripped);
    }
    path.to_path_buf()
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

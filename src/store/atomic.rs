//! Atomic JSON persistence: write to `.tmp`, fsync, then rename over the target.

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::errors::{Result, RetentionError};

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
///
/// Readers see either the previous document or the new one, never a torn write.
/// The temp file is removed if any step fails.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| RetentionError::io(parent, e))?;
    }

    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    let tmp_path = tmp_path_for(path);

    let result = (|| -> std::io::Result<()> {
        {
            let mut opts = OpenOptions::new();
            opts.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o644);
            }
            let mut file = opts.open(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)
    })();

    if let Err(source) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(RetentionError::io(path, source));
    }
    Ok(())
}

/// Outcome of reading a JSON document that may be absent or corrupt.
#[derive(Debug)]
pub enum JsonRead<T> {
    Missing,
    Unparsable(String),
    Loaded(T),
}

/// Read and parse `path`. Absence and parse failures are reported, not raised;
/// only unexpected IO failures become errors.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<JsonRead<T>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(JsonRead::Missing),
        Err(err) => return Err(RetentionError::io(path, err)),
    };
    match serde_json::from_slice::<T>(&raw) {
        Ok(value) => Ok(JsonRead::Loaded(value)),
        Err(err) => Ok(JsonRead::Unparsable(err.to_string())),
    }
}

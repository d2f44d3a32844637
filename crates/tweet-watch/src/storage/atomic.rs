//! Crash-safe JSON file replacement.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{WatchError, WatchResult};

/// Write `value` as pretty JSON to `path` with a single atomic replace.
///
/// Writes `<path>.tmp`, fsyncs it, then renames it over `path`. Readers see
/// either the previous file or the new one, never a partial write.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> WatchResult<()> {
    let persist_err = |reason: String| WatchError::Persistence {
        path: path.display().to_string(),
        reason,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| persist_err(e.to_string()))?;
        }
    }

    let bytes = serde_json::to_vec_pretty(value)?;
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(tmp_path)
            .map_err(|e| persist_err(e.to_string()))?;
        file.write_all(&bytes)
            .map_err(|e| persist_err(e.to_string()))?;
        file.sync_all().map_err(|e| persist_err(e.to_string()))?;
    }

    std::fs::rename(tmp_path, path).map_err(|e| persist_err(e.to_string()))?;
    Ok(())
}

/// Read a JSON state file, returning `None` when it does not exist yet.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> WatchResult<Option<T>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

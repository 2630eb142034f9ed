//! Result store
//!
//! One file per accepted work unit at `<data_dir>/<id><suffix>`. The presence
//! of that file is what marks a sample as done across restarts.

use crate::error::CollectError;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ResultStore {
    data_dir: PathBuf,
    suffix: String,
}

impl ResultStore {
    pub fn new(data_dir: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            suffix: suffix.into(),
        }
    }

    /// Output path for a unit id
    ///
    /// The id is cleaned lexically first, so `..` segments can never climb
    /// out of the data directory.
    pub fn path_for(&self, id: &str) -> PathBuf {
        let mut path = self.data_dir.join(sanitize_id(id));
        let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(&self.suffix);
        path.set_file_name(name);
        path
    }

    /// Whether a result for `id` is already on disk
    pub fn exists(&self, id: &str) -> bool {
        self.path_for(id).exists()
    }

    /// Persist a payload
    ///
    /// Empty payloads are accepted without touching the filesystem. Data is
    /// written to a temporary file next to the target and renamed over it,
    /// so a reader never sees a partial result.
    pub fn store(&self, id: &str, payload: &[u8]) -> Result<(), CollectError> {
        if payload.is_empty() {
            return Ok(());
        }

        let path = self.path_for(id);
        let wrap = |source: std::io::Error| CollectError::Store {
            id: id.to_string(),
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(wrap)?;
        }

        let mut tmp_name = std::ffi::OsString::from(".");
        tmp_name.push(path.file_name().unwrap_or_default());
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        let mut file = fs::File::create(&tmp_path).map_err(wrap)?;
        file.write_all(payload).map_err(wrap)?;
        file.sync_all().map_err(wrap)?;
        drop(file);

        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            wrap(e)
        })?;

        Ok(())
    }
}

/// Lexically clean an id into a relative path
///
/// Empty and `.` segments are dropped and `..` removes the previous segment
/// (or nothing, at the root). Backslashes count as separators.
pub fn sanitize_id(id: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();

    for segment in id.split(|c| c == '/' || c == '\\') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return "_".to_string();
    }
    parts.join("/")
}

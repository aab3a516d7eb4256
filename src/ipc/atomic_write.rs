//! Atomic file writing primitive shared by the Tool IPC Server and the
//! Snapshots writer.
//!
//! Writes into a [`tempfile::NamedTempFile`] created *in the target
//! directory*, then `persist()`s it — guaranteeing the rename is
//! same-filesystem and therefore atomic on POSIX.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::{AppError, Result};

/// Summary of a completed atomic write.
#[derive(Debug, Clone)]
pub struct WriteSummary {
    /// Absolute path of the written file.
    pub path: PathBuf,
    /// Number of bytes written.
    pub bytes_written: usize,
}

/// Write `content` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns `AppError::Io` if directory creation, the temp-file write, or
/// the final rename fails.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<WriteSummary> {
    let parent = path
        .parent()
        .ok_or_else(|| AppError::Io(format!("{} has no parent directory", path.display())))?;

    std::fs::create_dir_all(parent).map_err(|err| {
        AppError::Io(format!(
            "failed to create parent directories for {}: {err}",
            path.display()
        ))
    })?;

    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|err| AppError::Io(format!("failed to create temporary file: {err}")))?;

    tmp.write_all(content)
        .map_err(|err| AppError::Io(format!("failed to write temporary file: {err}")))?;

    tmp.persist(path)
        .map_err(|err| AppError::Io(format!("failed to persist file to {}: {err}", path.display())))?;

    Ok(WriteSummary {
        path: path.to_path_buf(),
        bytes_written: content.len(),
    })
}

/// Serialize `value` and write it atomically to `path`.
///
/// # Errors
///
/// Returns `AppError::Io` on serialization or write failure.
pub fn write_json_atomic(path: &Path, value: &serde_json::Value) -> Result<WriteSummary> {
    let content = serde_json::to_vec_pretty(value)
        .map_err(|err| AppError::Io(format!("failed to serialize json: {err}")))?;
    write_atomic(path, &content)
}

/// Generate the `<unix-ms>-<random>.json` filename used for tool request
/// and response files.
#[must_use]
pub fn generate_request_filename() -> String {
    let unix_ms = chrono::Utc::now().timestamp_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{unix_ms}-{}.json", &suffix[..8])
}

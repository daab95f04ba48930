//! Temporary artifact names and atomic finalization.
//!
//! Producers (external tools and downloads) write to `{name}.part` and the
//! file is renamed onto its final name only once it is complete. A final name
//! on disk therefore always denotes a finished artifact.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::{GgufkitError, Result};

/// Suffix appended to an artifact while it is being produced.
pub const PART_SUFFIX: &str = ".part";

/// `{path}.part`
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

/// Remove a leftover part file from an earlier interrupted attempt.
pub fn clear_stale_part(part: &Path) -> Result<()> {
    if part.exists() {
        std::fs::remove_file(part)
            .map_err(|e| GgufkitError::io("removing stale part file", part, e))?;
    }
    Ok(())
}

/// Rename a completed part file onto its final name.
///
/// Fails with [`GgufkitError::FileNotFound`] when the producer exited
/// successfully but never wrote the part file.
pub fn finalize_part(part: &Path, dest: &Path) -> Result<()> {
    if !part.exists() {
        return Err(GgufkitError::FileNotFound(part.to_path_buf()));
    }
    std::fs::rename(part, dest).map_err(|e| GgufkitError::io("finalizing artifact", part, e))
}

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

pub const DEVICE_DIR: &str = "/dev";
pub const DEVICE_PREFIX: &str = "tty.usbmodem";

/// Returns the first entry of `dir`, in name order, whose name starts with
/// [`DEVICE_PREFIX`].
pub fn locate(dir: impl AsRef<Path>) -> Result<Option<PathBuf>, anyhow::Error> {
    let dir = dir.as_ref();
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read device directory {}", dir.display()))?;

    let mut found: Option<PathBuf> = None;
    for entry in entries {
        let entry = entry
            .with_context(|| format!("Failed to read entry of {}", dir.display()))?;
        if !entry.file_name().to_string_lossy().starts_with(DEVICE_PREFIX) {
            continue;
        }

        let path = entry.path();
        if found.as_ref().is_none_or(|current| path < *current) {
            found = Some(path);
        }
    }

    Ok(found)
}

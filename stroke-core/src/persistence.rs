//! Atomic file writes and JSON load/save.
//!
//! Every artifact file (model config, variables, transform asset, diagram)
//! goes through [`atomic_write`] so a crash mid-write never leaves a
//! truncated file at the target path.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

/// Atomically write JSON data to a file.
///
/// Pretty-printed; see [`atomic_write`].
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

/// Atomically write raw bytes to a file.
///
/// Bytes go to `<file name>.tmp` next to the target, which is then renamed
/// over it. Missing parent directories are created.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// `model_plot.png` -> `model_plot.png.tmp`, so files sharing a stem in one
/// directory never share a temp file.
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Load and deserialize JSON from a file.
///
/// Returns `Ok(None)` if the file doesn't exist.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    let value =
        serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

/// Load JSON that must exist.
pub fn load_json_required<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<T> {
    load_json(path)?.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )
    })
}

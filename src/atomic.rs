// Atomic file replacement
//
// Readers of a file written through this module see either the previous
// contents or the new contents, never a truncated mix.

use crate::error::{LauncherError, LauncherResult};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs::{self, OpenOptions};
use std::io::Write;

/// Sibling path used while writing `path`.
pub fn tmp_sibling(path: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{}.tmp", path))
}

/// Write `contents` to `<path>.tmp`, sync it, then rename over `path`.
///
/// The parent directory is created if needed. On failure the temporary
/// file is removed and `path` is left untouched.
pub fn write_atomic(path: &Utf8Path, contents: &[u8]) -> LauncherResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| LauncherError::io(parent, e))?;
    }

    let temp_path = tmp_sibling(path);
    let result = write_and_sync(&temp_path, contents)
        .and_then(|()| fs::rename(&temp_path, path).map_err(|e| LauncherError::io(path, e)));

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn write_and_sync(temp_path: &Utf8Path, contents: &[u8]) -> LauncherResult<()> {
    let mut temp_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(temp_path)
        .map_err(|e| LauncherError::io(temp_path, e))?;

    temp_file
        .write_all(contents)
        .map_err(|e| LauncherError::io(temp_path, e))?;

    // Data must be on disk before the rename makes it visible
    temp_file
        .sync_all()
        .map_err(|e| LauncherError::io(temp_path, e))
}

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Replace `path` with `bytes` in one step.
///
/// The data goes to a sibling temp file first, then takes the target's name,
/// so readers see the old contents or the new ones. Missing parent
/// directories are created.
///
/// # Errors
/// Returns an error if the directories cannot be created or the write or rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    // Sibling of the target so the rename stays on one filesystem
    let mut file = NamedTempFile::new_in(parent)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Remove a file, treating "not found" as success.
///
/// Returns `true` if a file was actually removed.
///
/// # Errors
/// Returns an error for any failure other than the file being absent.
pub fn remove_file_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

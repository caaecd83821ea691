//! Host file I/O.
//!
//! Reading source files for `add` and writing freshly formatted images. Image
//! files are written atomically through a temporary file so a failed format
//! never leaves a half-written image behind.

use crate::error::Result;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tempfile::Builder;

/// Reads the entire contents of a host file into a vector.
///
/// # Arguments
///
/// * `path` - Path to the file to read
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;
    Ok(data)
}

/// Performs an atomic file write operation using a closure.
///
/// Creates a temporary file in the same directory as the target, calls
/// `write_fn` on it, syncs it, and renames it over the target path.
///
/// # Errors
///
/// Returns an error if any step of the operation fails. The target is left
/// untouched in that case.
pub fn write_atomically<F>(path: &Path, write_fn: F) -> Result<()>
where
    F: FnOnce(&mut File) -> std::result::Result<(), io::Error>,
{
    let output_dir = match path.parent() {
        Some(dir) if dir.as_os_str().is_empty() => Path::new("."),
        Some(dir) => dir,
        None => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no parent directory", path.display()),
            )
            .into())
        }
    };

    let mut temp_file = Builder::new()
        .prefix("fatdisk")
        .suffix(".tmp")
        .tempfile_in(output_dir)?;

    write_fn(temp_file.as_file_mut())?;
    temp_file.as_file().sync_all()?;

    temp_file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

//! I/O helpers shared by the persistence manager.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::Path;

use crc32fast::Hasher;

use crate::error::FieldError;

/// Maps an I/O error to the storage error variants.
pub fn classify_io_error(error: std::io::Error, context: &str) -> FieldError {
    match error.kind() {
        ErrorKind::StorageFull | ErrorKind::OutOfMemory => {
            FieldError::DiskFull(format!("{}: {}", context, error))
        }
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => {
            FieldError::TransientIoError(format!("{}: {}", context, error))
        }
        _ => FieldError::IoError(format!("{}: {}", context, error)),
    }
}

/// Runs `operation`, retrying only `TransientIoError` failures.
///
/// # Arguments
/// * `operation` - Operation to run
/// * `max_retries` - Retries after the first attempt
/// * `retry_delay_ms` - Pause between attempts
/// * `context` - Operation name for logs
pub fn retry_io_operation<F, T>(
    operation: F,
    max_retries: u32,
    retry_delay_ms: u64,
    context: &str,
) -> Result<T, FieldError>
where
    F: Fn() -> Result<T, FieldError>,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(FieldError::TransientIoError(reason)) if attempt < max_retries => {
                attempt += 1;
                tracing::warn!(
                    "Transient I/O error in {} (attempt {}/{}): {}",
                    context,
                    attempt,
                    max_retries,
                    reason
                );
                if retry_delay_ms > 0 {
                    std::thread::sleep(std::time::Duration::from_millis(retry_delay_ms));
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// CRC32 of a byte slice.
pub fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Writes `bytes` to `path` through a temporary sibling and an atomic rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), FieldError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| classify_io_error(e, "Failed to create data directory"))?;
    }

    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = Path::new(&temp_path);

    let mut file =
        File::create(temp_path).map_err(|e| classify_io_error(e, "Failed to create temp file"))?;
    file.write_all(bytes)
        .map_err(|e| classify_io_error(e, "Failed to write temp file"))?;
    file.sync_all()
        .map_err(|e| classify_io_error(e, "Failed to sync temp file"))?;

    fs::rename(temp_path, path).map_err(|e| classify_io_error(e, "Failed to rename temp file"))?;
    Ok(())
}

//! Filename validation shared by backends.

use crate::traits::{StorageError, StorageResult};

const MAX_FILENAME_LEN: usize = 255;

/// Accept only single-component filenames that cannot escape a directory.
pub fn validate_filename(filename: &str) -> StorageResult<()> {
    if filename.is_empty() || filename.len() > MAX_FILENAME_LEN {
        return Err(StorageError::InvalidName(format!(
            "filename must be 1-{} bytes",
            MAX_FILENAME_LEN
        )));
    }
    if filename.starts_with('.')
        || filename.contains("..")
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains('\0')
    {
        return Err(StorageError::InvalidName(filename.to_string()));
    }
    Ok(())
}

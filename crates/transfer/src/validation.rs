use std::path::{Component, Path};

use crate::TransferError;

/// Validates that a client-supplied file name stays inside the staging root.
///
/// Rejects:
/// - Empty names and names containing NUL
/// - Absolute paths (Unix `/`, Windows `C:\`, UNC `\\server`)
/// - Parent directory traversal (`..`)
/// - Drive-letter prefixes even on platforms that do not parse them
pub fn validate_file_name(file_name: &str) -> Result<(), TransferError> {
    if file_name.is_empty() {
        return Err(TransferError::InvalidPath("empty file name".into()));
    }
    if file_name.contains('\0') {
        return Err(TransferError::InvalidPath(format!(
            "NUL byte in file name: {file_name:?}"
        )));
    }
    if file_name.starts_with("\\\\") {
        return Err(TransferError::InvalidPath(format!(
            "UNC path not allowed: {file_name}"
        )));
    }
    if file_name.len() >= 2 && file_name.as_bytes()[1] == b':' {
        return Err(TransferError::InvalidPath(format!(
            "drive prefix not allowed: {file_name}"
        )));
    }

    let path = Path::new(file_name);
    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {file_name}"
        )));
    }

    let mut has_normal = false;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {file_name}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {file_name}"
                )));
            }
            Component::Normal(_) => has_normal = true,
            Component::CurDir => {}
        }
    }
    if !has_normal {
        return Err(TransferError::InvalidPath(format!(
            "file name has no components: {file_name}"
        )));
    }

    Ok(())
}

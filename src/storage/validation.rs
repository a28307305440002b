//! Path validation
//!
//! Normalizes client supplied virtual paths and rejects traversal above the root.

use crate::error::StorageError;

/// Normalizes a virtual path to the form `/a/b`.
///
/// Empty segments and `.` are dropped, `..` pops one level. Popping above the
/// root is a traversal attempt and is rejected.
pub fn normalize_path(path: &str) -> Result<String, StorageError> {
    if path.contains('\0') {
        return Err(StorageError::InvalidPath(path.to_string()));
    }

    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(StorageError::InvalidPath(path.to_string()));
                }
            }
            other => parts.push(other),
        }
    }

    Ok(format!("/{}", parts.join("/")))
}

/// Returns the parent of a normalized path, `None` for the root.
pub fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Returns the last segment of a normalized path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Joins a normalized directory path and a child name.
pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

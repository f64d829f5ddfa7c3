//! Node path rules.
//!
//! Paths are absolute and slash separated. Root is `/`; every other path
//! has no trailing slash and no empty, `.` or `..` segment.

use crate::constants::ROOT_PATH;
use crate::constants::SEQUENTIAL_SUFFIX_WIDTH;
use crate::NodeError;

pub fn validate_path(path: &str) -> Result<(), NodeError> {
    let invalid = |reason: &'static str| NodeError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    if path.is_empty() {
        return Err(invalid("path must not be empty"));
    }
    if !path.starts_with('/') {
        return Err(invalid("path must start with /"));
    }
    if path == ROOT_PATH {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(invalid("path must not end with /"));
    }
    if path.contains('\0') {
        return Err(invalid("null character not allowed"));
    }
    for segment in path[1..].split('/') {
        match segment {
            "" => return Err(invalid("empty node name")),
            "." | ".." => return Err(invalid("relative paths not allowed")),
            _ => {}
        }
    }
    Ok(())
}

/// Parent of a validated path. Root has none.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == ROOT_PATH {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT_PATH),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of a validated path; empty for root.
pub fn node_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Appends the zero padded sequence derived from the parent's cversion.
pub fn sequential_path(
    path: &str,
    parent_cversion: i32,
) -> String {
    format!("{path}{:0width$}", parent_cversion, width = SEQUENTIAL_SUFFIX_WIDTH)
}

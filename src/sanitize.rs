//! Mapping of recorded archive paths to destinations below an installation root.
//!
//! Archive member names are untrusted input. A recorded path is accepted only
//! when it is relative, free of parent-directory segments, and still lands
//! below the root after joining.

use std::path::{Component, Path, PathBuf};

use crate::error::PathError;

/// A recorded entry path that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedPath {
    pub recorded: String,
    /// Path relative to the root, built from normal components only.
    pub relative: PathBuf,
    pub destination: PathBuf,
}

/// Resolve `recorded` below `target_root`.
///
/// Backslashes count as separators; `.` and empty segments are dropped.
pub fn resolve(recorded: &str, target_root: &Path) -> Result<SanitizedPath, PathError> {
    let escape = |reason: &'static str| PathError::Escape {
        recorded: recorded.to_string(),
        reason,
    };

    if recorded.contains('\0') {
        return Err(escape("NUL byte in path"));
    }

    let unified = recorded.replace('\\', "/");
    if unified.starts_with('/') {
        return Err(escape("absolute path"));
    }
    if has_drive_prefix(&unified) {
        return Err(escape("drive prefix"));
    }

    let mut relative = PathBuf::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(escape("parent directory segment")),
            part => relative.push(part),
        }
    }

    // A segment such as "C:" on Windows would still parse as a prefix here.
    if relative.as_os_str().is_empty() {
        return Err(escape("empty path"));
    }
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(escape("non-normal path component"));
    }

    let destination = target_root.join(&relative);
    if !is_strictly_under(&destination, target_root) {
        return Err(escape("resolves outside the installation root"));
    }

    Ok(SanitizedPath {
        recorded: recorded.to_string(),
        relative,
        destination,
    })
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Lexically normalize `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !result.pop() {
                    result.push(component);
                }
            }
            _ => result.push(component),
        }
    }
    result
}

/// Component-wise check that `path` is a descendant of `dir` (and not `dir` itself).
fn is_strictly_under(path: &Path, dir: &Path) -> bool {
    let path = normalize(path);
    let dir = normalize(dir);

    let path_components: Vec<_> = path.components().collect();
    let dir_components: Vec<_> = dir.components().collect();

    path_components.len() > dir_components.len()
        && dir_components
            .iter()
            .zip(path_components.iter())
            .all(|(d, p)| d == p)
}

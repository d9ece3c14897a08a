//! Path utilities for workspace boundary validation.
//!
//! Every path the agent hands us is resolved against the workspace root and
//! rejected if, after canonicalization, it lands outside of it.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::api::types::ApiError;

/// Canonicalizes and validates a workspace root directory.
///
/// # Returns
/// * `Ok(PathBuf)` - Canonicalized absolute path
/// * `Err(ApiError)` - If path doesn't exist, isn't a directory, or can't be canonicalized
pub fn canonicalize_workspace_root(root: &Path) -> Result<PathBuf, ApiError> {
    let display = root.display().to_string();
    if display.trim().is_empty() {
        return Err(ApiError::invalid("Workspace root cannot be empty"));
    }

    if !root.exists() {
        return Err(ApiError::PathNotFound { path: display });
    }

    if !root.is_dir() {
        return Err(ApiError::PathNotDirectory { path: display });
    }

    root.canonicalize()
        .map_err(|e| ApiError::io(&format!("Failed to canonicalize path '{display}'"), e))
}

fn escapes(input: &str) -> ApiError {
    ApiError::invalid(format!("Path escapes workspace root: {input}"))
}

fn canonical_root(root: &Path) -> Result<PathBuf, ApiError> {
    root.canonicalize().map_err(|e| {
        ApiError::io(
            &format!("Failed to canonicalize workspace root '{}'", root.display()),
            e,
        )
    })
}

/// Join `input` onto `root` unless it is already absolute.
fn candidate_path(root: &Path, input: &str) -> Result<PathBuf, ApiError> {
    if input.trim().is_empty() {
        return Err(ApiError::invalid("Path cannot be empty"));
    }

    let input_path = Path::new(input);
    Ok(if input_path.is_absolute() {
        input_path.to_path_buf()
    } else {
        root.join(input_path)
    })
}

/// Fold `.` and `..` without touching the filesystem.
///
/// Only used to classify paths that don't exist; existing paths are
/// canonicalized instead.
fn lexically_normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Resolve an existing file or directory within a workspace root.
///
/// The input must exist: symlinks and `..` are resolved before the boundary
/// check, so neither can be used to leave the root.
pub fn resolve_path_in_workspace(root: &Path, input: &str) -> Result<PathBuf, ApiError> {
    let root = canonical_root(root)?;
    let candidate = candidate_path(&root, input)?;

    let resolved = candidate.canonicalize().map_err(|e| match e.kind() {
        // Don't reveal whether files outside the root exist
        ErrorKind::NotFound if !lexically_normalize(&candidate).starts_with(&root) => escapes(input),
        ErrorKind::NotFound => ApiError::PathNotFound {
            path: input.to_string(),
        },
        _ => ApiError::io(&format!("Failed to canonicalize path '{input}'"), e),
    })?;

    if !resolved.starts_with(&root) {
        return Err(escapes(input));
    }

    Ok(resolved)
}

/// Resolve a file path that is about to be written.
///
/// The file itself may not exist yet, but its parent directory must, and the
/// canonical parent must be inside the root.
pub fn resolve_write_target_in_workspace(root: &Path, input: &str) -> Result<PathBuf, ApiError> {
    let root = canonical_root(root)?;
    let candidate = candidate_path(&root, input)?;

    let file_name = match candidate.components().next_back() {
        Some(Component::Normal(name)) => name.to_os_string(),
        _ => return Err(ApiError::invalid(format!("Path does not name a file: {input}"))),
    };

    let parent = candidate
        .parent()
        .ok_or_else(|| ApiError::invalid(format!("Path must include a parent directory: {input}")))?;

    let parent = parent.canonicalize().map_err(|e| match e.kind() {
        ErrorKind::NotFound if !lexically_normalize(parent).starts_with(&root) => escapes(input),
        ErrorKind::NotFound => ApiError::PathNotFound {
            path: parent.display().to_string(),
        },
        _ => ApiError::io(&format!("Failed to canonicalize parent of '{input}'"), e),
    })?;

    if !parent.starts_with(&root) {
        return Err(escapes(input));
    }

    Ok(parent.join(file_name))
}

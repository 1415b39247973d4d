// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Conversion between caller-supplied paths and the
//! mount-relative paths that are stored in a volume.

use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};

use relative_path::{RelativePath, RelativePathBuf};

use crate::{Error, Result};

#[cfg(test)]
#[path = "./path_test.rs"]
mod path_test;

/// Strip a path down into an absolute-style unix path.
///
/// This only has an effect on windows, where the same rules as
/// [`unixify_windows_path`] are applied.
pub fn unixify_path(path: &str) -> Cow<'_, str> {
    if cfg!(windows) {
        Cow::Owned(unixify_windows_path(path))
    } else {
        Cow::Borrowed(path)
    }
}

/// Rewrite a windows path into a unix-like one.
///
/// - `\\?\C:\` verbatim prefixes are reduced to `C:\`
/// - runs of forward and back slashes become a single `/`
/// - a leading drive letter or `./` is removed
/// - a trailing slash is dropped
pub fn unixify_windows_path(path: &str) -> String {
    let path = match path.strip_prefix(r"\\?\") {
        Some(rest) if has_drive_prefix(rest) => rest,
        _ => path,
    };

    let mut unified = String::with_capacity(path.len());
    let mut last_was_sep = false;
    for c in path.chars() {
        if c == '/' || c == '\\' {
            if !last_was_sep {
                unified.push('/');
            }
            last_was_sep = true;
        } else {
            unified.push(c);
            last_was_sep = false;
        }
    }

    let stripped = if let Some(rest) = unified.strip_prefix("./") {
        rest.to_string()
    } else {
        let letters = unified
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .count();
        if letters > 0 && unified[letters..].starts_with(':') {
            unified[letters + 1..].to_string()
        } else {
            unified
        }
    };

    match stripped.strip_suffix('/') {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => stripped,
    }
}

/// True if the given string looks like an absolute windows path.
pub fn is_windows_path(path: &str) -> bool {
    path.starts_with(r"\\") || (has_drive_prefix(path) && path[2..].starts_with('\\'))
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Make a path absolute and lexically resolve any `.` and `..`
/// components, without touching the filesystem.
pub fn normalize<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let path = path.as_ref();
    let absolute =
        std::path::absolute(path).map_err(|err| Error::InvalidPath(path.to_owned(), err))?;
    let absolute = dunce::simplified(&absolute);

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                normalized.push(component.as_os_str())
            }
            Component::CurDir => {}
            Component::ParentDir => {
                // popping at the root is a no-op, which matches
                // how the kernel treats '/..'
                normalized.pop();
            }
        }
    }
    Ok(normalized)
}

/// Express an absolute path relative to the given mounting root.
///
/// Returns `None` when the path does not lie under the root. The
/// root itself maps to the empty relative path.
pub fn to_relative(root: &Path, path: &Path) -> Option<RelativePathBuf> {
    let stripped = path.strip_prefix(root).ok()?;
    RelativePathBuf::from_path(stripped).ok()
}

/// Rebuild the absolute form of a path stored relative to the root.
pub fn to_absolute(root: &Path, relative: &RelativePath) -> PathBuf {
    if relative.as_str().is_empty() {
        return root.to_path_buf();
    }
    relative.to_logical_path(root)
}

/// True if `path` is strictly below `root`.
pub fn is_strict_descendant(root: &Path, path: &Path) -> bool {
    path != root && path.starts_with(root)
}

/// Iterate the ancestors of a relative path, closest first,
/// ending with the mounting root (the empty path).
pub fn ancestors(relative: &RelativePath) -> impl Iterator<Item = &RelativePath> {
    std::iter::successors(relative.parent(), |p| p.parent())
}

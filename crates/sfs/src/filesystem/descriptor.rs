// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ulid::Ulid;

/// An open file in a [`super::StaticFilesystem`].
///
/// Descriptors are only valid for the filesystem instance that
/// issued them, and only until they are closed as many times
/// as the same file was opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileDescriptor {
    pub(super) id: Arc<str>,
    pub(super) filesystem: Ulid,
    pub(super) path: PathBuf,
}

impl FileDescriptor {
    pub(super) fn new(filesystem: Ulid, mounting_root: &Path, path: PathBuf) -> Self {
        let id = format!(
            "{}#{}",
            crate::path::unixify_path(&mounting_root.to_string_lossy()),
            crate::path::unixify_path(&path.to_string_lossy()),
        );
        Self {
            id: id.into(),
            filesystem,
            path,
        }
    }

    /// The identifier of this descriptor, `<mounting root>#<path>`
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The normalized absolute path that was opened
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Display for FileDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// Bookkeeping for one entry in the descriptor table
#[derive(Debug)]
pub(super) struct OpenFile {
    /// The archive path of the volume that owns the file
    pub volume: PathBuf,
    pub path: PathBuf,
    pub open_count: usize,
}

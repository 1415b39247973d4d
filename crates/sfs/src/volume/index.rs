// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use relative_path::{RelativePath, RelativePathBuf};
use serde::{Deserialize, Serialize};

use crate::encoding::Fingerprint;
use crate::stat::VolumeStats;
use crate::{Error, Result};

#[cfg(test)]
#[path = "./index_test.rs"]
mod index_test;

/// The location of a single file's content within an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: RelativePathBuf,
    /// Absolute byte offset of the first content byte in the archive
    pub offset: u64,
    pub size: u64,
}

/// A directory of a volume and the names of its immediate children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub path: RelativePathBuf,
    pub children: BTreeSet<String>,
    /// Set when native modules were found (and skipped) in this directory
    pub has_native_modules: bool,
}

impl DirectoryEntry {
    pub fn new(path: RelativePathBuf) -> Self {
        Self {
            path,
            ..Default::default()
        }
    }
}

/// The complete file and directory index of one volume.
#[derive(Debug, Clone, Default)]
pub(crate) struct Index {
    pub files: BTreeMap<RelativePathBuf, FileEntry>,
    pub directories: BTreeMap<RelativePathBuf, DirectoryEntry>,
}

impl Index {
    pub fn insert_file(&mut self, entry: FileEntry) {
        self.files.insert(entry.path.clone(), entry);
    }

    pub fn insert_directory(&mut self, path: RelativePathBuf) {
        self.directories
            .entry(path.clone())
            .or_insert_with(|| DirectoryEntry::new(path));
    }

    /// Make sure that every file and directory is reachable from
    /// the root by walking children lists.
    pub fn link_ancestors(&mut self) {
        let root = RelativePathBuf::new();
        self.directories
            .entry(root.clone())
            .or_insert_with(|| DirectoryEntry::new(root));
        let paths: Vec<RelativePathBuf> = self
            .files
            .keys()
            .chain(self.directories.keys())
            .cloned()
            .collect();
        for path in paths {
            let mut child = path.as_relative_path();
            for parent in crate::path::ancestors(&path) {
                let Some(name) = child.file_name() else {
                    break;
                };
                self.directories
                    .entry(parent.to_owned())
                    .or_insert_with(|| DirectoryEntry::new(parent.to_owned()))
                    .children
                    .insert(name.to_string());
                child = parent;
            }
        }
    }

    /// The fingerprint over every file path in this index.
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        Ok(Fingerprint::from_paths(self.files.keys().map(|p| p.as_str()))?)
    }

    pub fn from_sidecar(volume: &Path, sidecar: IndexFile) -> Result<Self> {
        let mut index = Self::default();
        for (path, children) in sidecar.directories_index {
            let path = parse_stored_path(volume, &path)?;
            index.directories.insert(
                path.clone(),
                DirectoryEntry {
                    path,
                    children: children.into_iter().collect(),
                    has_native_modules: false,
                },
            );
        }
        for (path, location) in sidecar.files_index {
            let path = parse_stored_path(volume, &path)?;
            index.insert_file(FileEntry {
                path,
                offset: location.offset,
                size: location.size,
            });
        }
        Ok(index)
    }
}

/// Validate a path string read back from an index, which must
/// be a plain relative path with no parent or current dir components.
pub(crate) fn parse_stored_path(volume: &Path, path: &str) -> Result<RelativePathBuf> {
    let valid = path.is_empty()
        || path
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..");
    if !valid {
        return Err(Error::CorruptVolume(
            volume.to_owned(),
            format!("invalid path in index: '{path}'"),
        ));
    }
    Ok(RelativePathBuf::from(path))
}

/// The location of a file as recorded in the sidecar index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedFile {
    pub offset: u64,
    pub size: u64,
}

/// The sidecar index file written next to each archive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexFile {
    /// Relative directory path (the root being the empty string) to child names
    pub directories_index: BTreeMap<String, Vec<String>>,
    pub files_index: BTreeMap<String, IndexedFile>,
    pub volume_stats: VolumeStats,
}

impl IndexFile {
    pub(crate) fn new(
        files: &[FileEntry],
        directories: &BTreeMap<RelativePathBuf, DirectoryEntry>,
        volume_stats: VolumeStats,
    ) -> Self {
        Self {
            directories_index: directories
                .iter()
                .map(|(path, dir)| (path.to_string(), dir.children.iter().cloned().collect()))
                .collect(),
            files_index: files
                .iter()
                .map(|f| {
                    (
                        f.path.to_string(),
                        IndexedFile {
                            offset: f.offset,
                            size: f.size,
                        },
                    )
                })
                .collect(),
            volume_stats,
        }
    }

    /// Read and parse a sidecar index from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .map_err(|err| Error::StorageReadError("read on index file", path.to_owned(), err))?;
        Ok(serde_json::from_slice(&data)?)
    }
}

/// A human-readable summary of a written volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// The file name of this manifest
    pub manifest: String,
    pub mounting_root: PathBuf,
    pub hash: Fingerprint,
    pub volume: PathBuf,
    /// Every directory of the volume except the root, sorted
    pub directories: Vec<String>,
    /// Every file of the volume, sorted
    pub files: Vec<String>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .map_err(|err| Error::StorageReadError("read on manifest file", path.to_owned(), err))?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub(crate) fn directories_of<'a>(
        directories: impl IntoIterator<Item = &'a RelativePath>,
    ) -> Vec<String> {
        directories
            .into_iter()
            .filter(|p| !p.as_str().is_empty())
            .map(|p| p.to_string())
            .collect()
    }
}
